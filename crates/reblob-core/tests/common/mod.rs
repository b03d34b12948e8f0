#![allow(dead_code)]

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use prost::Message;
use reblob_core::format::pbf::messages::{
    DenseInfo, DenseNodes, HeaderBlock, Info, Node, PrimitiveBlock, PrimitiveGroup, Relation,
    StringTable, Way,
};
use reblob_core::format::pbf::{BlockPool, encode_blob};
use reblob_core::{
    Block, BlockKind, BlockReader, BufferPool, Compression, FrameHeader, PooledBlock,
};

pub type TestResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

pub fn strings(values: &[&str]) -> StringTable {
    StringTable {
        s: values.iter().map(|v| v.as_bytes().to_vec()).collect(),
    }
}

pub fn header_block(required: &[&str]) -> HeaderBlock {
    HeaderBlock {
        required_features: required.iter().map(|f| f.to_string()).collect(),
        writingprogram: Some("reblob-tests".to_string()),
        ..Default::default()
    }
}

/// A block of plain nodes. Node `i` carries the tag `keys[i % n] = vals[i % n]`
/// and a user name, all taken from `table`.
pub fn node_block(table: &[&str], ids: std::ops::Range<i64>) -> PrimitiveBlock {
    let last = (table.len() - 1) as u32;
    let nodes = ids
        .map(|id| {
            let sid = 1 + (id as u32 % last);
            Node {
                id,
                keys: vec![sid],
                vals: vec![1 + ((sid) % last)],
                info: Some(Info {
                    version: Some(1),
                    user_sid: Some(sid),
                    ..Default::default()
                }),
                lat: id * 7,
                lon: id * 11,
            }
        })
        .collect();
    PrimitiveBlock {
        stringtable: strings(table),
        primitivegroup: vec![PrimitiveGroup {
            nodes,
            ..Default::default()
        }],
        granularity: Some(100),
        date_granularity: Some(1000),
        ..Default::default()
    }
}

/// A block holding one group of each entity kind, all referring to `table`.
pub fn mixed_block(table: &[&str], base_id: i64) -> PrimitiveBlock {
    let last = table.len() as i32 - 1;
    let sid = |i: i32| 1 + (i % last);
    let dense = DenseNodes {
        id: vec![base_id, 1, 1],
        lat: vec![10, 1, 1],
        lon: vec![20, 1, 1],
        keys_vals: vec![sid(0), sid(1), 0, 0, sid(2), sid(3), sid(4), sid(5), 0],
        denseinfo: Some(DenseInfo {
            version: vec![1, 1, 1],
            timestamp: vec![100, 1, 1],
            changeset: vec![5, 0, 0],
            uid: vec![3, 0, 1],
            user_sid: vec![sid(2), sid(0) - sid(2), sid(4) - sid(0)],
            visible: Vec::new(),
        }),
    };
    let way = Way {
        id: base_id + 100,
        keys: vec![sid(1) as u32],
        vals: vec![sid(3) as u32],
        info: Some(Info {
            user_sid: Some(sid(5) as u32),
            ..Default::default()
        }),
        refs: vec![base_id, 1, 1],
        ..Default::default()
    };
    let relation = Relation {
        id: base_id + 200,
        keys: vec![sid(4) as u32],
        vals: vec![sid(2) as u32],
        roles_sid: vec![sid(0), sid(6)],
        memids: vec![base_id + 100, -100],
        types: vec![1, 0],
        ..Default::default()
    };
    PrimitiveBlock {
        stringtable: strings(table),
        primitivegroup: vec![
            PrimitiveGroup {
                dense: Some(dense),
                ..Default::default()
            },
            PrimitiveGroup {
                ways: vec![way],
                ..Default::default()
            },
            PrimitiveGroup {
                relations: vec![relation],
                ..Default::default()
            },
        ],
        granularity: Some(100),
        date_granularity: Some(1000),
        ..Default::default()
    }
}

pub fn pooled(pool: &BlockPool, block: PrimitiveBlock) -> PooledBlock {
    pool.adopt(block)
}

/// Appends one frame to `out`.
pub fn encode_frame<M: Message>(
    kind: BlockKind,
    message: &M,
    compression: Compression,
    out: &mut Vec<u8>,
) -> TestResult {
    let mut blob = Vec::new();
    encode_blob(&message.encode_to_vec(), compression, &mut blob)?;
    FrameHeader::new(kind, blob.len()).write(out)?;
    out.extend_from_slice(&blob);
    Ok(())
}

/// Builds a complete file image: the header block followed by `blocks`.
pub fn pbf_bytes(
    header: &HeaderBlock,
    blocks: &[PrimitiveBlock],
    compression: Compression,
) -> TestResult<Vec<u8>> {
    let mut out = Vec::new();
    encode_frame(BlockKind::Header, header, Compression::Raw, &mut out)?;
    for block in blocks {
        encode_frame(BlockKind::Data, block, compression, &mut out)?;
    }
    Ok(out)
}

pub fn write_pbf(
    path: &Path,
    header: &HeaderBlock,
    blocks: &[PrimitiveBlock],
    compression: Compression,
) -> TestResult {
    let mut file = BufWriter::new(File::create(path)?);
    file.write_all(&pbf_bytes(header, blocks, compression)?)?;
    file.flush()?;
    Ok(())
}

/// Reads a whole file back, cloning data blocks out of their pool.
pub fn read_pbf(path: &Path) -> TestResult<(HeaderBlock, Vec<PrimitiveBlock>)> {
    let reader = BlockReader::open(
        path,
        2,
        4,
        Arc::new(BufferPool::new(1024, 4)),
        Arc::new(BlockPool::new(0, 4)),
    )?;

    let mut header = None;
    let mut blocks = Vec::new();
    for decoded in reader {
        match decoded?.block {
            Block::Header(block) => header = Some(block),
            Block::Data(block) => blocks.push((*block).clone()),
        }
    }
    let header = header.ok_or("file has no header block")?;
    Ok((header, blocks))
}

/// A tag or attribution value resolved to its string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    Node {
        id: i64,
        tags: Vec<(String, String)>,
        user: Option<String>,
    },
    Way {
        id: i64,
        tags: Vec<(String, String)>,
        user: Option<String>,
    },
    Relation {
        id: i64,
        tags: Vec<(String, String)>,
        roles: Vec<String>,
    },
}

/// Every entity of `blocks` in order, with all string references resolved.
pub fn resolve_entities(blocks: &[PrimitiveBlock]) -> Vec<Resolved> {
    let mut out = Vec::new();
    for block in blocks {
        let s = |sid: i64| -> String {
            String::from_utf8_lossy(&block.stringtable.s[sid as usize]).into_owned()
        };
        let pairs = |keys: &[u32], vals: &[u32]| -> Vec<(String, String)> {
            keys.iter()
                .zip(vals)
                .map(|(k, v)| (s(i64::from(*k)), s(i64::from(*v))))
                .collect()
        };
        let user = |info: &Option<Info>| {
            info.as_ref()
                .and_then(|info| info.user_sid)
                .map(|sid| s(i64::from(sid)))
        };

        for group in &block.primitivegroup {
            for node in &group.nodes {
                out.push(Resolved::Node {
                    id: node.id,
                    tags: pairs(&node.keys, &node.vals),
                    user: user(&node.info),
                });
            }
            if let Some(dense) = &group.dense {
                let mut id = 0i64;
                let mut user_sid = 0i64;
                let mut kv = dense.keys_vals.iter();
                for (i, delta) in dense.id.iter().enumerate() {
                    id += delta;
                    let mut tags = Vec::new();
                    while let Some(&key) = kv.next() {
                        if key == 0 {
                            break;
                        }
                        let val = kv.next().copied().unwrap_or(0);
                        tags.push((s(i64::from(key)), s(i64::from(val))));
                    }
                    let user = dense.denseinfo.as_ref().and_then(|info| {
                        info.user_sid.get(i).map(|delta| {
                            user_sid += i64::from(*delta);
                            s(user_sid)
                        })
                    });
                    out.push(Resolved::Node { id, tags, user });
                }
            }
            for way in &group.ways {
                out.push(Resolved::Way {
                    id: way.id,
                    tags: pairs(&way.keys, &way.vals),
                    user: user(&way.info),
                });
            }
            for relation in &group.relations {
                out.push(Resolved::Relation {
                    id: relation.id,
                    tags: pairs(&relation.keys, &relation.vals),
                    roles: relation
                        .roles_sid
                        .iter()
                        .map(|sid| s(i64::from(*sid)))
                        .collect(),
                });
            }
        }
    }
    out
}
