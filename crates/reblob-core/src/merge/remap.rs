use crate::format::pbf::messages::{DenseInfo, DenseNodes, Info, PrimitiveGroup};
use crate::format::pbf::PrimitiveBlock;
use crate::{ReblobError, Result};

use super::StringIndex;

/// Returns true when both blocks encode coordinates and timestamps the same
/// way. Absent parameters only match absent parameters.
pub fn compatible(a: &PrimitiveBlock, b: &PrimitiveBlock) -> bool {
    a.granularity == b.granularity
        && a.date_granularity == b.date_granularity
        && a.lat_offset == b.lat_offset
        && a.lon_offset == b.lon_offset
}

/// Folds `candidate` into `target`.
///
/// Returns `Ok(false)` without touching `target` when the blocks are not
/// [`compatible`]. Otherwise the candidate's strings are interned into the
/// target's table through `index`, which is built from the target on first
/// use, and copies of the candidate's groups are renumbered and appended.
///
/// `candidate` itself is never modified. The size cap is not checked here.
pub fn merge(
    target: &mut PrimitiveBlock,
    index: &mut Option<StringIndex>,
    candidate: &PrimitiveBlock,
) -> Result<bool> {
    if !compatible(target, candidate) {
        return Ok(false);
    }

    let index = match index {
        Some(index) => index,
        None => index.insert(StringIndex::build(&target.stringtable)?),
    };

    let mut positions = Vec::with_capacity(candidate.stringtable.s.len());
    for value in &candidate.stringtable.s {
        positions.push(index.intern(&mut target.stringtable, value)?);
    }

    let remap = Remap {
        positions: &positions,
    };
    let start = target.primitivegroup.len();
    target
        .primitivegroup
        .extend(candidate.primitivegroup.iter().cloned());
    for group in &mut target.primitivegroup[start..] {
        remap.group(group)?;
    }

    Ok(true)
}

/// Old string position to new string position, for one candidate block.
struct Remap<'a> {
    positions: &'a [u32],
}

impl Remap<'_> {
    fn lookup(&self, old: i64) -> Result<u32> {
        usize::try_from(old)
            .ok()
            .and_then(|old| self.positions.get(old).copied())
            .ok_or_else(|| {
                ReblobError::format(format!(
                    "string reference {old} outside a table of {} entries",
                    self.positions.len()
                ))
            })
    }

    fn group(&self, group: &mut PrimitiveGroup) -> Result<()> {
        for node in &mut group.nodes {
            self.tags(&mut node.keys, &mut node.vals)?;
            self.info(node.info.as_mut())?;
        }
        if let Some(dense) = group.dense.as_mut() {
            self.dense(dense)?;
        }
        for way in &mut group.ways {
            self.tags(&mut way.keys, &mut way.vals)?;
            self.info(way.info.as_mut())?;
        }
        for relation in &mut group.relations {
            self.tags(&mut relation.keys, &mut relation.vals)?;
            self.info(relation.info.as_mut())?;
            for role in &mut relation.roles_sid {
                *role = to_i32(self.lookup(i64::from(*role))?)?;
            }
        }
        Ok(())
    }

    fn tags(&self, keys: &mut [u32], vals: &mut [u32]) -> Result<()> {
        for sid in keys.iter_mut().chain(vals.iter_mut()) {
            *sid = self.lookup(i64::from(*sid))?;
        }
        Ok(())
    }

    fn info(&self, info: Option<&mut Info>) -> Result<()> {
        if let Some(sid) = info.and_then(|info| info.user_sid.as_mut()) {
            *sid = self.lookup(i64::from(*sid))?;
        }
        Ok(())
    }

    fn dense(&self, dense: &mut DenseNodes) -> Result<()> {
        // Zero ends the tag list of one node.
        for sid in dense.keys_vals.iter_mut().filter(|sid| **sid != 0) {
            let position = self.lookup(i64::from(*sid))?;
            if position == 0 {
                return Err(ReblobError::format(format!(
                    "dense tag string {sid} renumbers onto the tag terminator"
                )));
            }
            *sid = to_i32(position)?;
        }
        if let Some(info) = dense.denseinfo.as_mut() {
            self.dense_user_sids(info)?;
        }
        Ok(())
    }

    /// User name references are delta coded: each entry is the difference to
    /// the previous absolute position. Deltas are rebuilt against the new
    /// positions since the renumbering does not preserve differences.
    fn dense_user_sids(&self, info: &mut DenseInfo) -> Result<()> {
        let mut old_position = 0i64;
        let mut new_previous = 0i64;
        for delta in &mut info.user_sid {
            old_position += i64::from(*delta);
            let new_position = i64::from(self.lookup(old_position)?);
            *delta = i32::try_from(new_position - new_previous).map_err(|_| {
                ReblobError::format("user name delta overflows after renumbering")
            })?;
            new_previous = new_position;
        }
        Ok(())
    }
}

fn to_i32(position: u32) -> Result<i32> {
    i32::try_from(position)
        .map_err(|_| ReblobError::format(format!("string position {position} overflows")))
}
