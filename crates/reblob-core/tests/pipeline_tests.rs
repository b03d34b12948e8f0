mod common;

use std::fs;
use std::path::Path;

use common::{
    TestResult, header_block, mixed_block, node_block, pbf_bytes, read_pbf, resolve_entities,
    write_pbf,
};
use prost::Message;
use reblob_core::format::pbf::MAX_FRAME_HEADER_SIZE;
use reblob_core::format::pbf::messages::PrimitiveBlock;
use reblob_core::format::pbf::encode_blob;
use reblob_core::{
    BlockKind, Compression, FrameHeader, ReblobError, ReblobOptions, ReblobPipeline, reblob,
};
use tempfile::tempdir;

const TABLE: [&str; 7] = ["", "building", "yes", "addr:street", "High Street", "name", "Bob"];

fn options(max_blob_size: usize) -> ReblobOptions {
    ReblobOptions::default()
        .with_workers(3)
        .with_max_blob_size(max_blob_size)
}

fn small_blocks() -> Vec<PrimitiveBlock> {
    let mut blocks: Vec<_> = (0..24).map(|i| node_block(&TABLE, i * 20..i * 20 + 20)).collect();
    blocks.extend((0..6).map(|i| mixed_block(&TABLE, 10_000 + i * 1000)));
    blocks
}

fn root(err: &ReblobError) -> &ReblobError {
    match err {
        ReblobError::Context { source, .. } => root(source),
        other => other,
    }
}

#[test]
fn small_blocks_are_merged_under_the_cap() -> TestResult {
    let dir = tempdir()?;
    let (input, output) = (dir.path().join("in.pbf"), dir.path().join("out.pbf"));
    let blocks = small_blocks();
    let header = header_block(&["OsmSchema-V0.6", "DenseNodes"]);
    write_pbf(&input, &header, &blocks, Compression::Zlib)?;

    let cap = 16 * 1024;
    let stats = reblob(&input, &output, &options(cap))?;

    let (header_out, merged) = read_pbf(&output)?;
    assert_eq!(header_out, header);
    assert_eq!(stats.blocks_in, blocks.len() as u64);
    assert_eq!(stats.blocks_out, merged.len() as u64);
    assert_eq!(stats.frames_read, blocks.len() as u64 + 1);
    assert_eq!(stats.bytes_written, fs::metadata(&output)?.len());
    assert!(merged.len() < blocks.len());
    assert!(stats.merge_ratio() > 1.0);
    for block in &merged {
        assert!(block.encoded_len() <= cap, "{} > {cap}", block.encoded_len());
    }
    assert_eq!(resolve_entities(&merged), resolve_entities(&blocks));
    Ok(())
}

#[test]
fn every_compression_round_trips() -> TestResult {
    let dir = tempdir()?;
    let input = dir.path().join("in.pbf");
    let blocks = small_blocks();
    write_pbf(&input, &header_block(&[]), &blocks, Compression::Raw)?;
    let expected = resolve_entities(&blocks);

    for compression in Compression::ALL {
        let output = dir.path().join(format!("out-{compression}.pbf"));
        let opts = options(1024 * 1024).with_compression(compression);
        let stats = reblob(&input, &output, &opts)?;

        assert_eq!(stats.blocks_out, 1, "{compression}");
        let (_, merged) = read_pbf(&output)?;
        assert_eq!(resolve_entities(&merged), expected, "{compression}");
    }
    Ok(())
}

#[test]
fn worker_count_does_not_change_the_output() -> TestResult {
    let dir = tempdir()?;
    let input = dir.path().join("in.pbf");
    write_pbf(&input, &header_block(&[]), &small_blocks(), Compression::Zstd)?;

    let mut outputs = Vec::new();
    for workers in [1, 2, 8] {
        let output = dir.path().join(format!("out-{workers}.pbf"));
        reblob(&input, &output, &options(8 * 1024).with_workers(workers))?;
        outputs.push(fs::read(&output)?);
    }
    assert_eq!(outputs[0], outputs[1]);
    assert_eq!(outputs[1], outputs[2]);
    Ok(())
}

#[test]
fn oversized_input_block_passes_through() -> TestResult {
    let dir = tempdir()?;
    let (input, output) = (dir.path().join("in.pbf"), dir.path().join("out.pbf"));
    let big = node_block(&TABLE, 0..400);
    assert!(big.encoded_len() > 2048);
    let blocks = vec![node_block(&TABLE, 1000..1002), big, node_block(&TABLE, 2000..2002)];
    write_pbf(&input, &header_block(&[]), &blocks, Compression::Zlib)?;

    let stats = reblob(&input, &output, &options(2048))?;
    assert_eq!(stats.oversized_blocks, 1);

    let (_, out) = read_pbf(&output)?;
    assert_eq!(out.len(), 3);
    assert_eq!(out[1], blocks[1]);
    assert_eq!(resolve_entities(&out), resolve_entities(&blocks));
    Ok(())
}

#[test]
fn header_frame_keeps_its_index_data() -> TestResult {
    let dir = tempdir()?;
    let (input, output) = (dir.path().join("in.pbf"), dir.path().join("out.pbf"));

    let mut header_blob = Vec::new();
    encode_blob(
        &header_block(&["OsmSchema-V0.6"]).encode_to_vec(),
        Compression::Raw,
        &mut header_blob,
    )?;
    let mut frame = FrameHeader::new(BlockKind::Header, header_blob.len());
    frame.index_data = Some(b"bbox:0,0,1,1".to_vec());
    let mut bytes = Vec::new();
    frame.write(&mut bytes)?;
    bytes.extend_from_slice(&header_blob);
    let rest = pbf_bytes(&header_block(&[]), &small_blocks(), Compression::Zlib)?;
    // Drop the second header frame: length prefix, header and blob.
    let mut cursor = rest.as_slice();
    let skipped = FrameHeader::read(&mut cursor)?.ok_or("missing frame")?;
    bytes.extend_from_slice(&cursor[skipped.data_size..]);
    fs::write(&input, bytes)?;

    reblob(&input, &output, &options(16 * 1024))?;

    let mut written = fs::File::open(&output)?;
    let first = FrameHeader::read(&mut written)?.ok_or("empty output")?;
    assert_eq!(first.block_type, "OSMHeader");
    assert_eq!(first.index_data.as_deref(), Some(&b"bbox:0,0,1,1"[..]));
    Ok(())
}

#[test]
fn header_only_input_gives_header_only_output() -> TestResult {
    let dir = tempdir()?;
    let (input, output) = (dir.path().join("in.pbf"), dir.path().join("out.pbf"));
    write_pbf(&input, &header_block(&["OsmSchema-V0.6"]), &[], Compression::Zlib)?;

    let stats = reblob(&input, &output, &options(4096))?;
    assert_eq!(stats.blocks_in, 0);
    assert_eq!(stats.blocks_out, 0);

    let (header, blocks) = read_pbf(&output)?;
    assert_eq!(header.required_features, vec!["OsmSchema-V0.6"]);
    assert!(blocks.is_empty());
    Ok(())
}

#[test]
fn corrupt_frame_header_leaves_no_output() -> TestResult {
    let dir = tempdir()?;
    let (input, output) = (dir.path().join("in.pbf"), dir.path().join("out.pbf"));
    let mut bytes = pbf_bytes(&header_block(&[]), &small_blocks(), Compression::Zlib)?;
    bytes.extend_from_slice(&(MAX_FRAME_HEADER_SIZE as u32 + 7).to_be_bytes());
    bytes.extend_from_slice(&[0u8; 32]);
    fs::write(&input, bytes)?;

    let err = reblob(&input, &output, &options(4096)).err().ok_or("run succeeded")?;
    assert!(matches!(root(&err), ReblobError::InvalidFormat(_)), "{err}");
    assert!(!output.exists());
    Ok(())
}

#[test]
fn unsupported_required_feature_is_refused() -> TestResult {
    let dir = tempdir()?;
    let (input, output) = (dir.path().join("in.pbf"), dir.path().join("out.pbf"));
    write_pbf(
        &input,
        &header_block(&["OsmSchema-V0.6", "Sort.Type_then_ID"]),
        &small_blocks(),
        Compression::Zlib,
    )?;

    let err = reblob(&input, &output, &options(4096)).err().ok_or("run succeeded")?;
    assert!(
        matches!(root(&err), ReblobError::UnsupportedFeature(name) if name == "Sort.Type_then_ID"),
        "{err}"
    );
    assert!(!output.exists());
    Ok(())
}

#[test]
fn existing_output_is_left_alone() -> TestResult {
    let dir = tempdir()?;
    let (input, output) = (dir.path().join("in.pbf"), dir.path().join("out.pbf"));
    write_pbf(&input, &header_block(&[]), &small_blocks(), Compression::Zlib)?;
    fs::write(&output, b"precious")?;

    let err = reblob(&input, &output, &options(4096)).err().ok_or("run succeeded")?;
    assert!(matches!(err, ReblobError::InvalidConfig(_)), "{err}");
    assert_eq!(fs::read(&output)?, b"precious");
    Ok(())
}

#[test]
fn missing_input_is_an_io_error() -> TestResult {
    let dir = tempdir()?;
    let output = dir.path().join("out.pbf");

    let err = reblob(Path::new("/nonexistent/in.pbf"), &output, &options(4096))
        .err()
        .ok_or("run succeeded")?;
    assert!(matches!(root(&err), ReblobError::Io(_)), "{err}");
    assert!(!output.exists());
    Ok(())
}

#[test]
fn data_before_header_is_refused() -> TestResult {
    let dir = tempdir()?;
    let (input, output) = (dir.path().join("in.pbf"), dir.path().join("out.pbf"));
    let mut bytes = Vec::new();
    common::encode_frame(
        reblob_core::BlockKind::Data,
        &node_block(&TABLE, 0..3),
        Compression::Raw,
        &mut bytes,
    )?;
    fs::write(&input, bytes)?;

    let err = reblob(&input, &output, &options(4096)).err().ok_or("run succeeded")?;
    assert!(matches!(root(&err), ReblobError::InvalidFormat(_)), "{err}");
    assert!(!output.exists());
    Ok(())
}

#[test]
fn second_header_mid_stream_is_refused() -> TestResult {
    let dir = tempdir()?;
    let (input, output) = (dir.path().join("in.pbf"), dir.path().join("out.pbf"));
    let mut bytes = pbf_bytes(&header_block(&[]), &small_blocks(), Compression::Zlib)?;
    common::encode_frame(
        reblob_core::BlockKind::Header,
        &header_block(&[]),
        Compression::Raw,
        &mut bytes,
    )?;
    fs::write(&input, bytes)?;

    let err = reblob(&input, &output, &options(4096)).err().ok_or("run succeeded")?;
    assert!(matches!(root(&err), ReblobError::UnexpectedBlock(_)), "{err}");
    assert!(!output.exists());
    Ok(())
}

#[test]
fn empty_input_is_refused() -> TestResult {
    let dir = tempdir()?;
    let (input, output) = (dir.path().join("in.pbf"), dir.path().join("out.pbf"));
    fs::write(&input, b"")?;

    let err = reblob(&input, &output, &options(4096)).err().ok_or("run succeeded")?;
    assert!(matches!(root(&err), ReblobError::InvalidFormat(_)), "{err}");
    assert!(!output.exists());
    Ok(())
}

#[test]
fn out_of_range_size_is_refused_up_front() {
    let too_small = ReblobPipeline::new(options(512));
    assert!(matches!(too_small, Err(ReblobError::InvalidConfig(_))));
    let too_large = ReblobPipeline::new(options(64 * 1024 * 1024));
    assert!(matches!(too_large, Err(ReblobError::InvalidConfig(_))));
}

#[test]
fn pipeline_can_run_twice() -> TestResult {
    let dir = tempdir()?;
    let input = dir.path().join("in.pbf");
    write_pbf(&input, &header_block(&[]), &small_blocks(), Compression::Zlib)?;

    let pipeline = ReblobPipeline::new(options(8 * 1024))?;
    let first = pipeline.run(&input, dir.path().join("a.pbf"))?;
    let second = pipeline.run(&input, dir.path().join("b.pbf"))?;
    assert_eq!(first.blocks_out, second.blocks_out);
    assert!(pipeline.buffer_pool().metrics().recycled > 0);
    assert_eq!(
        fs::read(dir.path().join("a.pbf"))?,
        fs::read(dir.path().join("b.pbf"))?
    );
    Ok(())
}
