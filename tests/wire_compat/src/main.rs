fn main() {
    println!("Run `cargo test -p wire-compat` to execute wire compatibility tests.");
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::path::PathBuf;

    use chunkferry_protocol::{
        BackupResource, ChunkStatus, ChunkUpload, CreatedResource, SessionRequest,
        SessionResponse,
    };
    use chunkferry_transfer::{EncodedChunk, TransferRecord, TransferStatus, decode, verify};

    /// Returns the path to the fixtures directory.
    fn fixtures_dir() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
    }

    /// Loads a fixture JSON file and returns it as a `serde_json::Value`.
    fn load_fixture(name: &str) -> serde_json::Value {
        let path = fixtures_dir().join(name);
        let data = fs::read_to_string(&path)
            .unwrap_or_else(|e| panic!("failed to read fixture {}: {e}", path.display()));
        serde_json::from_str(&data)
            .unwrap_or_else(|e| panic!("failed to parse fixture {}: {e}", path.display()))
    }

    fn parse<T: serde::de::DeserializeOwned>(name: &str) -> T {
        serde_json::from_value(load_fixture(name))
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"))
    }

    /// Deserializes a fixture into a Rust type, re-serializes it, and compares
    /// the JSON values (order-independent comparison).
    fn roundtrip_test<T>(name: &str)
    where
        T: serde::de::DeserializeOwned + serde::Serialize,
    {
        let fixture = load_fixture(name);
        let parsed: T = serde_json::from_value(fixture.clone())
            .unwrap_or_else(|e| panic!("failed to deserialize {name}: {e}"));
        let reserialized = serde_json::to_value(&parsed)
            .unwrap_or_else(|e| panic!("failed to re-serialize {name}: {e}"));

        assert_eq!(
            fixture, reserialized,
            "roundtrip mismatch for {name}:\n  wire: {fixture}\n  Rust: {reserialized}"
        );
    }

    // --- Sessions ---

    #[test]
    fn fixture_session_request() {
        roundtrip_test::<SessionRequest>("session_request.json");
    }

    #[test]
    fn fixture_session_response() {
        roundtrip_test::<SessionResponse>("session_response.json");
    }

    #[test]
    fn fixture_session_response_legacy_key() {
        let current: SessionResponse = parse("session_response.json");
        let legacy: SessionResponse = parse("session_response_legacy.json");
        assert_eq!(current, legacy);
    }

    // --- Backups ---

    #[test]
    fn fixture_backup_resource() {
        roundtrip_test::<BackupResource>("backup_resource.json");
    }

    #[test]
    fn fixture_backup_resource_without_id() {
        roundtrip_test::<BackupResource>("backup_resource_new.json");
        let resource: BackupResource = parse("backup_resource_new.json");
        assert!(resource.id.is_none());
        assert_eq!(resource.total_chunks, 3);
    }

    #[test]
    fn fixture_created_resource() {
        roundtrip_test::<CreatedResource>("created_resource.json");
    }

    #[test]
    fn fixture_created_resource_numeric_id() {
        let numeric: CreatedResource = parse("created_resource_numeric.json");
        let string: CreatedResource = parse("created_resource.json");
        assert_eq!(numeric, string);
    }

    // --- Chunks ---

    #[test]
    fn fixture_chunk_upload() {
        roundtrip_test::<ChunkUpload>("chunk_upload.json");
    }

    #[test]
    fn fixture_chunk_upload_checksum_verifies() {
        let upload: ChunkUpload = parse("chunk_upload.json");
        let encoded = EncodedChunk {
            payload: upload.data.clone(),
            checksum: upload.checksum.clone(),
        };
        assert!(verify(&encoded));
        assert_eq!(decode(&upload.data).unwrap(), b"Hello");
        assert_eq!(upload.size, 5);
    }

    #[test]
    fn fixture_chunk_status() {
        roundtrip_test::<ChunkStatus>("chunk_status.json");
        let status: ChunkStatus = parse("chunk_status.json");
        assert!(status.covers(3));
        assert!(!status.covers(4));
    }

    #[test]
    fn fixture_chunk_status_empty() {
        roundtrip_test::<ChunkStatus>("chunk_status_empty.json");
        let status: ChunkStatus = parse("chunk_status_empty.json");
        assert!(status.index.is_none());
        assert!(!status.covers(1));
    }

    // --- Catalog records ---

    #[test]
    fn fixture_transfer_record() {
        roundtrip_test::<TransferRecord>("transfer_record.json");
        let record: TransferRecord = parse("transfer_record.json");
        assert_eq!(record.status, TransferStatus::Error);
        assert_eq!(record.next_chunk_index(), 2);
        assert_eq!(record.total_chunks(), 3);
        assert_eq!(record.remaining_chunks(), 1);
        assert!(record.timestamps.completed.is_none());
    }
}
