use reblob_core::ReblobError;

#[test]
fn converts_io_error() {
    let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
    let error: ReblobError = io_error.into();

    match error {
        ReblobError::Io(err) => assert_eq!(err.kind(), std::io::ErrorKind::NotFound),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn converts_anyhow_error() {
    let anyhow_error = anyhow::anyhow!("boom");
    let error: ReblobError = anyhow_error.into();

    match error {
        ReblobError::Other(err) => assert_eq!(err.to_string(), "boom"),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn converts_decode_error() {
    use prost::Message;
    use reblob_core::format::pbf::BlobHeader;

    // A varint cut off after its continuation bytes.
    let Err(decode_error) = BlobHeader::decode(&[0xff, 0xff][..]) else {
        panic!("truncated varint decoded");
    };
    let error: ReblobError = decode_error.into();
    assert!(matches!(error, ReblobError::Decode(_)), "{error:?}");
}

#[test]
fn attaches_context() {
    let err = ReblobError::InvalidFormat("bad frame".to_string()).with_context("frame 12");

    match &err {
        ReblobError::Context { context, source } => {
            assert_eq!(context, "frame 12");
            assert!(matches!(**source, ReblobError::InvalidFormat(ref m) if m == "bad frame"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(err.to_string(), "frame 12: invalid format: bad frame");
}

#[test]
fn pool_stopped_is_seen_through_context() {
    assert!(ReblobError::PoolStopped.is_pool_stopped());
    assert!(
        ReblobError::PoolStopped
            .with_context("submitting frame 3")
            .with_context("reader")
            .is_pool_stopped()
    );
    assert!(!ReblobError::InvalidConfig("x".to_string()).is_pool_stopped());
}

#[test]
fn messages_name_the_offending_value() {
    let feature = ReblobError::UnsupportedFeature("HistoricalInformation2".to_string());
    assert!(feature.to_string().contains("HistoricalInformation2"));

    let block = ReblobError::UnexpectedBlock("OSMIndex".to_string());
    assert!(block.to_string().contains("OSMIndex"));
}
