//! VBlock — one bounded unit of input text, processed end-to-end by one
//! worker.
//!
//! A block owns its text payload, its line directory, the per-block
//! context scratch, and the serialized sections awaiting the I/O thread.
//! Blocks are recycled through a pool: `recycle` releases every buffer in
//! O(buffers) while keeping capacity for the next block.

use std::collections::HashMap;

use crate::buffer::Buffer;
use crate::context::{BlockContext, ContextInit, ContextSet};
use crate::error::Result;
use crate::fingerprint::FieldId;
use crate::random_access::RaAccum;
use crate::section::SectionBuf;

/// Default target text size per block: 16 MiB.
pub const DEFAULT_VBLOCK_SIZE: usize = 16 * 1024 * 1024;

/// Line terminator as found in the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eol {
    Lf,
    CrLf,
    /// Final line without a terminator.
    None,
}

impl Eol {
    pub fn bytes(self) -> &'static [u8] {
        match self {
            Eol::Lf   => b"\n",
            Eol::CrLf => b"\r\n",
            Eol::None => b"",
        }
    }
}

pub struct VBlock {
    pub vblock_i:    u32,
    pub component_i: u32,

    pub txt:         Buffer,
    /// Start offset of every physical line in `txt`.
    line_starts:     Vec<u32>,
    pub num_lines:   u32,
    pub longest_line: u32,

    pub ctxs:   Vec<BlockContext>,
    ctx_by_id:  HashMap<u64, usize>,

    pub ra:       RaAccum,
    /// Worker output: fully framed sections in write order.
    pub sections: Vec<SectionBuf>,

    pub in_use: bool,
}

impl Default for VBlock {
    fn default() -> Self {
        Self::new()
    }
}

impl VBlock {
    pub fn new() -> VBlock {
        VBlock {
            vblock_i: 0,
            component_i: 0,
            txt: Buffer::new("vb.txt"),
            line_starts: Vec::new(),
            num_lines: 0,
            longest_line: 0,
            ctxs: Vec::new(),
            ctx_by_id: HashMap::new(),
            ra: RaAccum::default(),
            sections: Vec::new(),
            in_use: false,
        }
    }

    /// Claim a pooled block for a new unit of text.
    pub fn prepare(&mut self, vblock_i: u32, component_i: u32) {
        debug_assert!(!self.in_use);
        self.vblock_i = vblock_i;
        self.component_i = component_i;
        self.txt.set_owner(vblock_i);
        self.in_use = true;
    }

    /// Scan the text payload into the line directory.
    pub fn build_line_table(&mut self) {
        self.line_starts.clear();
        self.longest_line = 0;
        let txt = self.txt.as_slice();
        let mut start = 0usize;
        while start < txt.len() {
            self.line_starts.push(start as u32);
            let len = match txt[start..].iter().position(|&b| b == b'\n') {
                Some(n) => n + 1,
                None    => txt.len() - start,
            };
            self.longest_line = self.longest_line.max(len as u32);
            start += len;
        }
        self.num_lines = self.line_starts.len() as u32;
    }

    /// Byte range of line `i` with the terminator stripped, plus the
    /// terminator kind.  Used by the seg driver, which detaches the text
    /// buffer while contexts are being mutated.
    pub fn line_range(&self, i: u32) -> (usize, usize, Eol) {
        let txt = self.txt.as_slice();
        let start = self.line_starts[i as usize] as usize;
        let end = self
            .line_starts
            .get(i as usize + 1)
            .map(|&s| s as usize)
            .unwrap_or(txt.len());
        let raw = &txt[start..end];
        if raw.ends_with(b"\r\n") {
            (start, end - 2, Eol::CrLf)
        } else if raw.ends_with(b"\n") {
            (start, end - 1, Eol::Lf)
        } else {
            (start, end, Eol::None)
        }
    }

    /// Line `i` without its terminator, plus the terminator kind.
    pub fn line(&self, i: u32) -> (&[u8], Eol) {
        let txt = self.txt.as_slice();
        let start = self.line_starts[i as usize] as usize;
        let end = self
            .line_starts
            .get(i as usize + 1)
            .map(|&s| s as usize)
            .unwrap_or(txt.len());
        let raw = &txt[start..end];
        if raw.ends_with(b"\r\n") {
            (&raw[..raw.len() - 2], Eol::CrLf)
        } else if raw.ends_with(b"\n") {
            (&raw[..raw.len() - 1], Eol::Lf)
        } else {
            (raw, Eol::None)
        }
    }

    // ── Context access ──────────────────────────────────────────────────────

    /// Index of the block context for `id`, creating both the block
    /// scratch and (on encode) the archive context on first touch.
    pub fn ctx_idx(&mut self, zset: &ContextSet, id: FieldId, name: &str, init: ContextInit) -> usize {
        if let Some(&i) = self.ctx_by_id.get(&id.as_u64()) {
            return i;
        }
        let did = zset.get_or_create(id, name, init);
        let i = self.ctxs.len();
        self.ctxs.push(BlockContext::new(id, name, did, init));
        self.ctx_by_id.insert(id.as_u64(), i);
        i
    }

    /// Decode-side variant: no archive context behind it.
    pub fn ctx_idx_decode(&mut self, id: FieldId, name: &str) -> usize {
        if let Some(&i) = self.ctx_by_id.get(&id.as_u64()) {
            return i;
        }
        let i = self.ctxs.len();
        self.ctxs.push(BlockContext::new_decode(id, name));
        self.ctx_by_id.insert(id.as_u64(), i);
        i
    }

    pub fn ctx_of(&mut self, id: FieldId) -> Option<&mut BlockContext> {
        let i = self.ctx_by_id.get(&id.as_u64()).copied()?;
        Some(&mut self.ctxs[i])
    }

    pub fn ctx_handle(&self, id: FieldId) -> Option<usize> {
        self.ctx_by_id.get(&id.as_u64()).copied()
    }

    /// Merge every touched context into the archive set, in creation
    /// order, and serialize the b250 streams.  Returns after the block's
    /// RA chromosome words have been rewritten to global word indices.
    pub fn merge_and_serialize(&mut self, zset: &ContextSet, chrom_id: Option<FieldId>) -> Result<()> {
        for i in 0..self.ctxs.len() {
            let map = self.ctxs[i].merge_into_global(zset)?;
            if Some(self.ctxs[i].id) == chrom_id {
                use crate::context::LOCAL_BIT;
                self.ra.remap_chrom(|w| {
                    if w & LOCAL_BIT != 0 { map[(w & !LOCAL_BIT) as usize] } else { w }
                });
            }
        }
        for ctx in &mut self.ctxs {
            ctx.serialize_b250()?;
        }
        Ok(())
    }

    /// Uncompressed text size of this block.
    pub fn txt_len(&self) -> usize {
        self.txt.len()
    }

    /// Release every buffer and return the block to the pool.
    pub fn recycle(&mut self) {
        self.txt.release();
        self.line_starts.clear();
        self.num_lines = 0;
        self.longest_line = 0;
        for ctx in &mut self.ctxs {
            ctx.reset();
        }
        // Keep the context array: field sets repeat block to block, so the
        // scratch (and its capacity) is reusable as-is.
        self.ra = RaAccum::default();
        self.sections.clear();
        self.in_use = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_table_handles_mixed_endings() {
        let mut vb = VBlock::new();
        vb.prepare(0, 0);
        vb.txt.extend_from_slice(b"aaa\r\nbb\nc");
        vb.build_line_table();
        assert_eq!(vb.num_lines, 3);
        assert_eq!(vb.line(0), (&b"aaa"[..], Eol::CrLf));
        assert_eq!(vb.line(1), (&b"bb"[..], Eol::Lf));
        assert_eq!(vb.line(2), (&b"c"[..], Eol::None));
        assert_eq!(vb.longest_line, 5);
    }

    #[test]
    fn recycle_clears_state_keeps_contexts() {
        use crate::fingerprint::{Category, FieldId};
        let zset = ContextSet::new();
        let mut vb = VBlock::new();
        vb.prepare(0, 0);
        vb.txt.extend_from_slice(b"x\n");
        vb.build_line_table();
        let i = vb.ctx_idx(&zset, FieldId::new("F", Category::Primary), "F", ContextInit::dict());
        vb.ctxs[i].seg(&zset, b"v").unwrap();
        vb.recycle();
        assert!(!vb.in_use);
        assert_eq!(vb.num_lines, 0);
        assert_eq!(vb.ctxs.len(), 1);
        assert!(vb.ctxs[0].refs.is_empty());
    }
}
