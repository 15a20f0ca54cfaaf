fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::fs;
    use std::path::PathBuf;

    use pcex_protocol::payload::{decode_drive_list, decode_path};
    use pcex_protocol::{
        Command, DecodeError, ErrorCode, FileEntry, Flags, Packet, ReadRequest, RemoteError,
        RenameRequest, SearchRequest, StorageInfo, WriteHeader, wire,
    };
    use serde::Deserialize;

    /// One frame as built by the reference peer.
    #[derive(Debug, Deserialize)]
    struct Fixture {
        command: Option<u8>,
        flags: Option<u8>,
        payload: Option<String>,
        frame: String,
    }

    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    fn load_fixtures() -> BTreeMap<String, Fixture> {
        let path = fixtures_dir().join("frames.json");
        let data = fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()));
        serde_json::from_str(&data)
            .unwrap_or_else(|e| panic!("failed to parse fixture {}: {e}", path.display()))
    }

    /// Decodes the named frame and checks it re-encodes to the same bytes.
    fn frame(name: &str) -> Packet {
        let fixtures = load_fixtures();
        let fx = fixtures
            .get(name)
            .unwrap_or_else(|| panic!("no fixture {name}"));
        let bytes = hex::decode(&fx.frame).unwrap();
        let packet = Packet::decode(&bytes).unwrap_or_else(|e| panic!("{name}: {e}"));

        assert_eq!(Some(packet.command_byte()), fx.command, "{name}: command");
        assert_eq!(Some(packet.flags().bits()), fx.flags, "{name}: flags");
        let payload = hex::decode(fx.payload.as_deref().unwrap_or_default()).unwrap();
        assert_eq!(packet.payload(), payload.as_slice(), "{name}: payload");
        assert_eq!(packet.encode(), bytes, "{name}: re-encoded frame differs");
        packet
    }

    #[test]
    fn every_fixture_reencodes_byte_for_byte() {
        for (name, fx) in load_fixtures() {
            if fx.command.is_none() {
                continue;
            }
            frame(&name);
        }
    }

    #[test]
    fn handshake_identities() {
        let request = frame("handshake_request");
        assert_eq!(request.command(), Some(Command::Handshake));
        assert_eq!(request.payload(), b"PCEX-Android-1.0");

        let response = frame("handshake_response");
        assert_eq!(response.command(), Some(Command::ResponseOk));
        assert_eq!(response.payload(), b"PCEX-Server-1.0");
    }

    #[test]
    fn path_request_with_non_ascii() {
        let packet = frame("list_dir_request");
        assert_eq!(
            decode_path(packet.payload()).unwrap(),
            "C:\\Users\\Público"
        );
    }

    #[test]
    fn file_list_and_single_entry() {
        let list = FileEntry::decode_list(frame("file_list_response").payload()).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(
            list[0],
            FileEntry {
                name: "Documents".into(),
                path: "C:\\Users\\Documents".into(),
                is_dir: true,
                size: 0,
                last_modified: 1_700_000_000_000,
            }
        );
        assert_eq!(list[1].name, "notas.txt");
        assert_eq!(list[1].size, 1234);
        assert!(!list[1].is_dir);

        let info = FileEntry::decode(frame("file_info_response").payload()).unwrap();
        assert_eq!(info.name, "boot.ini");
        assert_eq!(info.size, 211);
        assert_eq!(info.last_modified, 1_600_000_000_000);
    }

    #[test]
    fn request_payloads_match_reference_layout() {
        let rename = RenameRequest {
            path: "C:\\old.txt".into(),
            new_name: "new.txt".into(),
        };
        assert_eq!(frame("rename_request").payload(), rename.encode().as_slice());

        let search = SearchRequest {
            query: "report".into(),
            path: "D:\\".into(),
        };
        assert_eq!(frame("search_request").payload(), search.encode().as_slice());

        let read = ReadRequest::whole_file("C:\\video.mp4");
        assert_eq!(frame("read_request").payload(), read.encode().as_slice());

        let header = WriteHeader {
            path: "C:\\upload.bin".into(),
            total_size: 70_000,
            chunk_size: 32_768,
        };
        assert_eq!(frame("write_header").payload(), header.encode().as_slice());

        assert!(frame("drives_request").payload().is_empty());
    }

    #[test]
    fn data_responses() {
        assert_eq!(
            decode_drive_list(frame("drives_response").payload()).unwrap(),
            vec!["C:\\", "D:\\"]
        );

        let storage = StorageInfo::decode(frame("storage_response").payload()).unwrap();
        assert_eq!(storage.total_space, 500_107_862_016);
        assert_eq!(storage.free_space, 123_456_789_012);
        assert_eq!(storage.drive_letter, "C:\\");
        assert_eq!(storage.volume_name, "Windows");

        let error = RemoteError::decode(frame("error_response").payload()).unwrap();
        assert_eq!(error.error_code(), Some(ErrorCode::FileNotFound));
        assert_eq!(error.message, "Path not found: C:\\nope");
    }

    #[test]
    fn chunk_stream_flags() {
        let first = frame("chunk_continuation");
        assert_eq!(first.command(), Some(Command::ResponseFileChunk));
        assert_eq!(first.flags(), Flags::CONTINUATION);
        assert_eq!(first.payload().len(), 64);

        let last = frame("chunk_final");
        assert!(last.flags().contains(Flags::FINAL));
        assert_eq!(last.payload(), b"tail");

        assert_eq!(frame("stream_end").command(), Some(Command::ResponseEnd));
        assert_eq!(frame("disconnect").command(), Some(Command::Disconnect));
    }

    #[test]
    fn corrupted_checksum_is_rejected() {
        let fixtures = load_fixtures();
        let bytes = hex::decode(&fixtures["corrupt_checksum"].frame).unwrap();
        assert!(matches!(
            Packet::decode(&bytes),
            Err(DecodeError::ChecksumMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn reference_frames_read_back_to_back_from_a_stream() {
        let names = ["chunk_continuation", "chunk_final", "stream_end"];
        let fixtures = load_fixtures();
        let stream: Vec<u8> = names
            .iter()
            .flat_map(|n| hex::decode(&fixtures[*n].frame).unwrap())
            .collect();

        let mut reader = stream.as_slice();
        for name in names {
            let packet = wire::read_frame(&mut reader).await.unwrap();
            assert_eq!(packet, frame(name));
        }
        assert!(matches!(
            wire::read_frame(&mut reader).await,
            Err(pcex_protocol::WireError::PeerClosed)
        ));
    }
}
