//! Contexts — the per-field dictionary / payload / reference model.
//!
//! One [`Context`] aggregates everything ever seen for one logical field
//! across the archive: the append-only dictionary, the global value hash,
//! and the flags that govern encoding.  One [`BlockContext`] is the
//! block-private scratch for the same field: references accumulated per
//! row, values added this block (not yet merged), the local stream, and
//! decode cursors.
//!
//! Invariants:
//! - every b250 reference resolves to a valid dictionary word;
//! - once persisted, dictionary bytes of an existing word never change
//!   (the only reordering is the one-time frequency sort of the first
//!   block's words, which happens before any dictionary bytes are
//!   flushed);
//! - the dictionary contains no duplicate strings.
//!
//! # Snip control prefixes
//!
//! A dictionary value ("snip") whose first byte is below 0x08 is a control
//! sequence rather than literal text (genomic text is printable ASCII plus
//! tab, so the ranges cannot collide):
//!
//! | prefix | meaning |
//! |--------|---------|
//! | 0x01 SNIP_LOOKUP      | value bytes follow in the local stream; for `Seq` contexts an ASCII length follows the prefix |
//! | 0x02 SNIP_DELTA       | ASCII delta vs this context's stored last value |
//! | 0x03 SNIP_OTHER_DELTA | ASCII delta vs another context's stored value; target ref precedes the delta |
//! | 0x04 SNIP_COPY        | copy the target context's most recent value |
//! | 0x05 SNIP_SPECIAL     | one handler-id byte follows; data-type-specific |
//! | 0x06 SNIP_CONTAINER   | compound / info template; 0x01 bytes mark value slots |
//!
//! A target ref inside a snip is `category tag (1 ASCII byte) | name length
//! (1 byte) | name bytes` — deliberately free of 0x00 so the dictionary
//! sentinel stays unambiguous.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::b250::{self, B250, MAX_WORD};
use crate::buffer::Buffer;
use crate::error::{BiozError, Result};
use crate::fingerprint::{Category, FieldId};
use crate::hash::{value_hash, HashTable, LOCAL_BOOTSTRAP};

pub const SNIP_LOOKUP:      u8 = 0x01;
pub const SNIP_DELTA:       u8 = 0x02;
pub const SNIP_OTHER_DELTA: u8 = 0x03;
pub const SNIP_COPY:        u8 = 0x04;
pub const SNIP_SPECIAL:     u8 = 0x05;
pub const SNIP_CONTAINER:   u8 = 0x06;

/// First byte at or above this value is literal text.
pub const SNIP_RESERVED_MAX: u8 = 0x08;

/// Dictionary word separator, on disk and in memory.
pub const DICT_SEP: u8 = 0x00;

/// Marks a word index as transient (added by this block, pre-merge).
pub const LOCAL_BIT: u32 = 1 << 31;

// ── Local stream typing ─────────────────────────────────────────────────────

/// Layout of a context's local stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum LocalType {
    /// Sentinel-separated byte strings, interpreted as snips.
    #[default]
    Text = 0,
    /// Fixed-width unsigned 32-bit integers, little-endian.
    U32 = 1,
    /// Fixed-width signed 32-bit integers, little-endian.
    I32 = 2,
    /// Raw sequence bytes; lengths come from SNIP_LOOKUP snips.
    Seq = 3,
}

impl LocalType {
    pub fn from_u8(v: u8) -> Option<LocalType> {
        match v {
            0 => Some(LocalType::Text),
            1 => Some(LocalType::U32),
            2 => Some(LocalType::I32),
            3 => Some(LocalType::Seq),
            _ => None,
        }
    }
}

/// Per-field configuration, fixed at context creation and identical in
/// every block (field identity implies configuration).
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextInit {
    /// Do not externalize rare singletons into the local stream.  Held by
    /// every random-access key field so word indices stay stable.
    pub no_singletons: bool,
    /// Keep the last parsed numeric value for delta-base use.
    pub store_value:   bool,
    pub ltype:         LocalType,
}

impl ContextInit {
    pub fn dict() -> Self {
        ContextInit::default()
    }
    pub fn stable_dict() -> Self {
        ContextInit { no_singletons: true, ..Default::default() }
    }
    pub fn numeric() -> Self {
        ContextInit { store_value: true, no_singletons: true, ..Default::default() }
    }
    pub fn seq() -> Self {
        ContextInit { no_singletons: true, ltype: LocalType::Seq, ..Default::default() }
    }
}

// ── Dictionary node ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct DictNode {
    pub start: u32,
    pub len:   u32,
    pub count: u32,
}

// ── Archive-side context ─────────────────────────────────────────────────────

pub struct Context {
    pub id:   FieldId,
    pub name: String,

    /// Word bytes, each terminated by [`DICT_SEP`].  `flushed_bytes` and
    /// below have been persisted and are immutable.
    pub dict:  Vec<u8>,
    pub nodes: Vec<DictNode>,
    hash: HashTable,

    pub no_singletons:  bool,
    pub store_value:    bool,
    pub one_up_allowed: bool,
    pub ltype:          LocalType,

    /// Dictionary-fragment bookkeeping: everything below these marks has
    /// been written to a previous component's Dict section.
    pub flushed_words: usize,
    pub flushed_bytes: usize,

    /// Cached word index of the bare `[SNIP_LOOKUP]` snip.
    lookup_word: Option<u32>,
    /// Pathological input: dictionary abandoned, values go to local.
    pub degraded: bool,
}

impl Context {
    fn new(id: FieldId, name: &str, init: ContextInit) -> Context {
        Context {
            id,
            name: name.to_owned(),
            dict: Vec::new(),
            nodes: Vec::new(),
            hash: HashTable::new(64),
            no_singletons: init.no_singletons,
            store_value: init.store_value,
            // Genotype (type-2) streams are re-partitioned per sample at
            // decode and cannot be read strictly sequentially, so the
            // ONE_UP shortcut is disabled for them.
            one_up_allowed: id.category() != Category::Format,
            ltype: init.ltype,
            flushed_words: 0,
            flushed_bytes: 0,
            lookup_word: None,
            degraded: false,
        }
    }

    #[inline]
    pub fn num_words(&self) -> usize {
        self.nodes.len()
    }

    pub fn word_bytes(&self, w: u32) -> &[u8] {
        let n = &self.nodes[w as usize];
        &self.dict[n.start as usize..(n.start + n.len) as usize]
    }

    pub fn find_word(&self, bytes: &[u8]) -> Option<u32> {
        self.hash
            .lookup(value_hash(bytes), |n| self.word_bytes(n) == bytes)
    }

    /// Append a word without touching the hash (control snips are reached
    /// through cached indices, never by value lookup).
    fn append_word_unhashed(&mut self, bytes: &[u8]) -> Result<u32> {
        if self.dict.len() + bytes.len() + 1 > u32::MAX as usize {
            return Err(BiozError::DictOverflow { ctx: self.name.clone() });
        }
        if self.nodes.len() as u32 > MAX_WORD {
            return Err(BiozError::B250Overflow { ctx: self.name.clone() });
        }
        let start = self.dict.len() as u32;
        self.dict.extend_from_slice(bytes);
        self.dict.push(DICT_SEP);
        self.nodes.push(DictNode { start, len: bytes.len() as u32, count: 0 });
        Ok((self.nodes.len() - 1) as u32)
    }

    /// Deduplicating insert under the caller-held write lock.
    pub fn get_or_insert_word(&mut self, bytes: &[u8]) -> Result<u32> {
        if let Some(w) = self.find_word(bytes) {
            return Ok(w);
        }
        let w = self.append_word_unhashed(bytes)?;
        let dict = &self.dict;
        let nodes = &self.nodes;
        let word_of = |n: u32| {
            let node = &nodes[n as usize];
            &dict[node.start as usize..(node.start + node.len) as usize]
        };
        if self
            .hash
            .insert(value_hash(bytes), w, |n| value_hash(word_of(n)))
            .is_err()
        {
            // Probe chain past the hard cap even after growth: the input
            // is pathological for this hash.  Keep the word (it is already
            // referenced) but stop trusting the dictionary.
            self.degraded = true;
            eprintln!(
                "biozip: warning: context {} degraded to local storage (pathological hash chains)",
                self.name
            );
        }
        Ok(w)
    }

    /// Word index of the bare lookup snip, creating it on first use.
    pub fn ensure_lookup_word(&mut self) -> Result<u32> {
        if let Some(w) = self.lookup_word {
            return Ok(w);
        }
        let w = self.append_word_unhashed(&[SNIP_LOOKUP])?;
        self.lookup_word = Some(w);
        Ok(w)
    }

    pub fn lookup_word(&self) -> Option<u32> {
        self.lookup_word
    }

    /// Unflushed dictionary fragment: per-word slices (sentinel included)
    /// plus the word count, for the component-end Dict section.
    pub fn fragment(&self) -> (Vec<&[u8]>, usize) {
        let mut parts = Vec::with_capacity(self.nodes.len() - self.flushed_words);
        for n in &self.nodes[self.flushed_words..] {
            parts.push(&self.dict[n.start as usize..(n.start + n.len + 1) as usize]);
        }
        (parts, self.nodes.len() - self.flushed_words)
    }

    pub fn mark_flushed(&mut self) {
        self.flushed_words = self.nodes.len();
        self.flushed_bytes = self.dict.len();
    }
}

// ── Context set ──────────────────────────────────────────────────────────────

/// The archive's contexts.  Cross-links everywhere else are dense handles
/// (indices into this pool), not pointers.  One lock per context; the pool
/// itself only locks for creation and enumeration.
#[derive(Default)]
pub struct ContextSet {
    ctxs:  RwLock<Vec<Arc<RwLock<Context>>>>,
    by_id: RwLock<HashMap<u64, usize>>,
}

impl ContextSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, id: FieldId, name: &str, init: ContextInit) -> usize {
        if let Some(&did) = self.by_id.read().unwrap().get(&id.as_u64()) {
            return did;
        }
        let mut by_id = self.by_id.write().unwrap();
        if let Some(&did) = by_id.get(&id.as_u64()) {
            return did;
        }
        let mut ctxs = self.ctxs.write().unwrap();
        let did = ctxs.len();
        ctxs.push(Arc::new(RwLock::new(Context::new(id, name, init))));
        by_id.insert(id.as_u64(), did);
        did
    }

    pub fn get(&self, did: usize) -> Arc<RwLock<Context>> {
        Arc::clone(&self.ctxs.read().unwrap()[did])
    }

    pub fn handle_of(&self, id: FieldId) -> Option<usize> {
        self.by_id.read().unwrap().get(&id.as_u64()).copied()
    }

    pub fn len(&self) -> usize {
        self.ctxs.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stable snapshot for single-threaded phases (dict flush).
    pub fn snapshot(&self) -> Vec<Arc<RwLock<Context>>> {
        self.ctxs.read().unwrap().clone()
    }
}

// ── Block-side context ───────────────────────────────────────────────────────

/// Block-private scratch for one field.  Created lazily the first time the
/// segmenter or reconstructor touches the field in a block.
pub struct BlockContext {
    pub id:   FieldId,
    pub name: String,
    /// Dense handle into the archive [`ContextSet`]; `usize::MAX` at
    /// decode, where dictionaries come from the [`DictSet`].
    pub did:  usize,

    pub no_singletons:  bool,
    pub store_value:    bool,
    pub one_up_allowed: bool,
    pub ltype:          LocalType,

    // Encode: accumulated per-row references (LOCAL_BIT = this block).
    pub refs: Vec<B250>,
    // Encode: values first seen in this block.
    ldict:  Vec<u8>,
    lnodes: Vec<DictNode>,
    lhash:  HashTable,
    /// Segmenter writes the local stream directly (sequences, lengths);
    /// excludes this context from merge-time singleton externalization.
    pub local_direct: bool,

    pub local: Buffer,
    /// Serialized b250 stream: output of the merge on encode, section
    /// payload on decode.
    pub b250: Buffer,

    // Shared scratch.
    pub last_value: Option<i64>,
    pub last_txt:   Vec<u8>,
    pub last_line:  u32,

    // Decode cursors.
    pub b250_pos:  usize,
    pub b250_prev: Option<u32>,
    pub local_pos: usize,
    pub last_word: Option<u32>,
}

impl BlockContext {
    pub fn new(id: FieldId, name: &str, did: usize, init: ContextInit) -> BlockContext {
        BlockContext {
            id,
            name: name.to_owned(),
            did,
            no_singletons: init.no_singletons,
            store_value: init.store_value,
            one_up_allowed: id.category() != Category::Format,
            ltype: init.ltype,
            refs: Vec::new(),
            ldict: Vec::new(),
            lnodes: Vec::new(),
            lhash: HashTable::new(LOCAL_BOOTSTRAP / 64),
            local_direct: false,
            local: Buffer::new("ctx.local"),
            b250: Buffer::new("ctx.b250"),
            last_value: None,
            last_txt: Vec::new(),
            last_line: u32::MAX,
            b250_pos: 0,
            b250_prev: None,
            local_pos: 0,
            last_word: None,
        }
    }

    pub fn new_decode(id: FieldId, name: &str) -> BlockContext {
        Self::new(id, name, usize::MAX, ContextInit::default())
    }

    /// Reset per-block scratch for reuse; keeps allocation capacity.  The
    /// next block's local table is sized from this block's dictionary
    /// growth.
    pub fn reset(&mut self) {
        let prior_distinct = self.lnodes.len();
        self.refs.clear();
        self.ldict.clear();
        self.lnodes.clear();
        self.lhash = HashTable::new(prior_distinct.max(LOCAL_BOOTSTRAP / 64));
        self.local_direct = false;
        self.local.release();
        self.b250.release();
        self.last_value = None;
        self.last_txt.clear();
        self.last_line = u32::MAX;
        self.b250_pos = 0;
        self.b250_prev = None;
        self.local_pos = 0;
        self.last_word = None;
    }

    fn lnode_bytes(&self, li: u32) -> &[u8] {
        let n = &self.lnodes[li as usize];
        &self.ldict[n.start as usize..(n.start + n.len) as usize]
    }

    // ── Encode path ─────────────────────────────────────────────────────────

    /// Classify a value: local hash, then the global hash under a read
    /// view, then append to this block's local dictionary.  Returns a word
    /// index, with [`LOCAL_BIT`] set for block-transient words.
    pub fn evaluate(&mut self, zset: &ContextSet, bytes: &[u8]) -> Result<u32> {
        let h = value_hash(bytes);

        if let Some(li) = self.lhash.lookup(h, |n| self.lnode_bytes(n) == bytes) {
            self.lnodes[li as usize].count += 1;
            return Ok(li | LOCAL_BIT);
        }

        {
            let zarc = zset.get(self.did);
            let z = zarc.read().unwrap();
            if z.degraded {
                // All-local storage: the word is always the lookup snip.
                self.local.extend_from_slice(bytes);
                self.local.push(DICT_SEP);
                return Ok(z
                    .lookup_word()
                    .expect("degraded context always has a lookup word"));
            }
            if let Some(w) = z.find_word(bytes) {
                return Ok(w);
            }
        }

        let li = self.lnodes.len() as u32;
        if (li | LOCAL_BIT) == u32::MAX || li > MAX_WORD {
            return Err(BiozError::B250Overflow { ctx: self.name.clone() });
        }
        let start = self.ldict.len() as u32;
        self.ldict.extend_from_slice(bytes);
        self.lnodes.push(DictNode { start, len: bytes.len() as u32, count: 1 });
        let ldict = &self.ldict;
        let lnodes = &self.lnodes;
        let bytes_of = |n: u32| {
            let node = &lnodes[n as usize];
            &ldict[node.start as usize..(node.start + node.len) as usize]
        };
        // A saturated local table only costs dedup accuracy inside this
        // block; the merge re-deduplicates against the global dictionary.
        let _ = self.lhash.insert(h, li, |n| value_hash(bytes_of(n)));
        Ok(li | LOCAL_BIT)
    }

    /// Evaluate + record the per-row reference in one step.
    pub fn seg(&mut self, zset: &ContextSet, bytes: &[u8]) -> Result<u32> {
        let w = self.evaluate(zset, bytes)?;
        self.refs.push(B250::Word(w));
        Ok(w)
    }

    pub fn seg_empty(&mut self) {
        self.refs.push(B250::Empty);
    }

    pub fn seg_missing(&mut self) {
        self.refs.push(B250::Missing);
    }

    pub fn push_local_text(&mut self, bytes: &[u8]) {
        self.local_direct = true;
        self.local.extend_from_slice(bytes);
        self.local.push(DICT_SEP);
    }

    pub fn push_local_seq(&mut self, bytes: &[u8]) {
        self.local_direct = true;
        self.local.extend_from_slice(bytes);
    }

    pub fn push_local_u32(&mut self, v: u32) {
        self.local_direct = true;
        self.local.extend_from_slice(&v.to_le_bytes());
    }

    pub fn push_local_i32(&mut self, v: i32) {
        self.local_direct = true;
        self.local.extend_from_slice(&v.to_le_bytes());
    }

    /// Merge this block's additions into the archive context under its
    /// exclusive lock, then rewrite the accumulated references from
    /// transient to global word indices.
    ///
    /// The first block ever to merge a context sorts its words by
    /// descending frequency first, so the most common values get the
    /// shortest b250 encoding; this is the only reordering a dictionary
    /// ever sees and it happens before any of its bytes are persisted.
    ///
    /// Returns the local→global word map (the caller remaps RA chromosome
    /// words through it).
    pub fn merge_into_global(&mut self, zset: &ContextSet) -> Result<Vec<u32>> {
        let zarc = zset.get(self.did);
        let mut z = zarc.write().unwrap();

        let first = z.nodes.is_empty();
        let mut order: Vec<u32> = (0..self.lnodes.len() as u32).collect();
        if first {
            // Stable on creation order so count-1 words keep their row
            // order (externalization depends on it).
            order.sort_by(|&a, &b| {
                self.lnodes[b as usize]
                    .count
                    .cmp(&self.lnodes[a as usize].count)
                    .then(a.cmp(&b))
            });
        }

        let mut map = vec![0u32; self.lnodes.len()];
        for &li in &order {
            let node = self.lnodes[li as usize];
            let start = node.start as usize;
            let bytes = &self.ldict[start..start + node.len as usize];

            let externalize = !self.no_singletons
                && !self.local_direct
                && self.ltype == LocalType::Text
                && node.count == 1
                && !bytes.is_empty();
            if externalize {
                self.local.extend_from_slice(bytes);
                self.local.push(DICT_SEP);
                map[li as usize] = z.ensure_lookup_word()?;
            } else {
                map[li as usize] = z.get_or_insert_word(bytes)?;
                if z.degraded && self.ltype != LocalType::Text {
                    return Err(BiozError::Corrupt(format!(
                        "context {} with non-text local stream cannot degrade", self.name
                    )));
                }
            }
        }
        if z.degraded {
            z.ensure_lookup_word()?;
        }
        drop(z);

        for r in &mut self.refs {
            if let B250::Word(w) = *r {
                if w & LOCAL_BIT != 0 {
                    *r = B250::Word(map[(w & !LOCAL_BIT) as usize]);
                }
            }
        }
        Ok(map)
    }

    /// Serialize the (post-merge) reference vector into the b250 wire
    /// form.  ONE_UP only where the context permits it.
    pub fn serialize_b250(&mut self) -> Result<()> {
        let bytes = b250::serialize(&self.refs, self.one_up_allowed, &self.name)?;
        self.b250.set(bytes);
        Ok(())
    }

    pub fn has_output(&self) -> bool {
        !self.b250.is_empty() || !self.local.is_empty()
    }

    // ── Decode path ─────────────────────────────────────────────────────────

    /// Next reference from the b250 stream.
    pub fn next_b250(&mut self) -> Result<B250> {
        let code = b250::decode_at(
            self.b250.as_slice(),
            &mut self.b250_pos,
            &mut self.b250_prev,
            &self.name,
        )?;
        if let B250::Word(w) = code {
            self.last_word = Some(w);
        }
        Ok(code)
    }

    /// Next sentinel-terminated entry from a `Text` local stream, as a
    /// byte range into `self.local`.
    pub fn next_local_text_range(&mut self) -> Result<(usize, usize)> {
        let buf = self.local.as_slice();
        let start = self.local_pos;
        match buf[start..].iter().position(|&b| b == DICT_SEP) {
            Some(n) => {
                self.local_pos = start + n + 1;
                Ok((start, start + n))
            }
            None => Err(BiozError::Corrupt(format!(
                "local stream overrun in context {}", self.name
            ))),
        }
    }

    /// Copy `len` raw bytes from a `Seq` local stream into `out`.
    pub fn copy_local_seq(&mut self, len: usize, out: &mut Vec<u8>) -> Result<()> {
        let buf = self.local.as_slice();
        if self.local_pos + len > buf.len() {
            return Err(BiozError::Corrupt(format!(
                "local stream overrun in context {}", self.name
            )));
        }
        out.extend_from_slice(&buf[self.local_pos..self.local_pos + len]);
        self.local_pos += len;
        Ok(())
    }

    pub fn next_local_u32(&mut self) -> Result<u32> {
        let buf = self.local.as_slice();
        if self.local_pos + 4 > buf.len() {
            return Err(BiozError::Corrupt(format!(
                "local stream overrun in context {}", self.name
            )));
        }
        let v = u32::from_le_bytes(buf[self.local_pos..self.local_pos + 4].try_into().unwrap());
        self.local_pos += 4;
        Ok(v)
    }

    pub fn next_local_i32(&mut self) -> Result<i32> {
        Ok(self.next_local_u32()? as i32)
    }
}

// ── Decode-side dictionaries ─────────────────────────────────────────────────

/// One field's dictionary as reassembled from its Dict sections.
#[derive(Debug, Default)]
pub struct DictData {
    pub bytes: Vec<u8>,
    /// (start, len) per word, excluding the sentinel.
    pub words: Vec<(u32, u32)>,
}

impl DictData {
    fn append_fragment(&mut self, payload: &[u8], num_words: u32, name: &str) -> Result<()> {
        let base = self.bytes.len() as u32;
        let mut pos = 0usize;
        let mut added = 0u32;
        while pos < payload.len() {
            let n = payload[pos..]
                .iter()
                .position(|&b| b == DICT_SEP)
                .ok_or_else(|| {
                    BiozError::Corrupt(format!("unterminated dictionary word in {name}"))
                })?;
            self.words.push((base + pos as u32, n as u32));
            pos += n + 1;
            added += 1;
        }
        if added != num_words {
            return Err(BiozError::Corrupt(format!(
                "dictionary fragment of {name} declares {num_words} words, holds {added}"
            )));
        }
        self.bytes.extend_from_slice(payload);
        Ok(())
    }

    pub fn word(&self, w: u32) -> Option<&[u8]> {
        self.words
            .get(w as usize)
            .map(|&(start, len)| &self.bytes[start as usize..(start + len) as usize])
    }
}

/// All dictionaries of an archive, loaded once per decode session.
#[derive(Debug, Default)]
pub struct DictSet {
    map: HashMap<u64, DictData>,
}

impl DictSet {
    pub fn append_fragment(&mut self, id: FieldId, payload: &[u8], num_words: u32) -> Result<()> {
        self.map
            .entry(id.as_u64())
            .or_default()
            .append_fragment(payload, num_words, &id.name())
    }

    pub fn word(&self, id: FieldId, w: u32, ctx_name: &str) -> Result<&[u8]> {
        self.map
            .get(&id.as_u64())
            .and_then(|d| d.word(w))
            .ok_or_else(|| BiozError::Corrupt(format!(
                "b250 word {w} of context {ctx_name} has no dictionary entry"
            )))
    }

    /// Linear scan by value — used only to resolve user region names
    /// against the chromosome dictionary.
    pub fn find(&self, id: FieldId, value: &[u8]) -> Option<u32> {
        let d = self.map.get(&id.as_u64())?;
        d.words
            .iter()
            .position(|&(start, len)| {
                &d.bytes[start as usize..(start + len) as usize] == value
            })
            .map(|i| i as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_vbctx(zset: &ContextSet, init: ContextInit) -> BlockContext {
        let id = FieldId::new("TEST", Category::Primary);
        let did = zset.get_or_create(id, "TEST", init);
        BlockContext::new(id, "TEST", did, init)
    }

    #[test]
    fn evaluate_dedups_within_block() {
        let zset = ContextSet::new();
        let mut vb = make_vbctx(&zset, ContextInit::stable_dict());
        let a = vb.evaluate(&zset, b"chr1").unwrap();
        let b = vb.evaluate(&zset, b"chr2").unwrap();
        let c = vb.evaluate(&zset, b"chr1").unwrap();
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert!(a & LOCAL_BIT != 0);
    }

    #[test]
    fn first_merge_sorts_by_frequency() {
        let zset = ContextSet::new();
        let mut vb = make_vbctx(&zset, ContextInit::stable_dict());
        // "rare" appears once, "common" three times.
        vb.seg(&zset, b"rare").unwrap();
        vb.seg(&zset, b"common").unwrap();
        vb.seg(&zset, b"common").unwrap();
        vb.seg(&zset, b"common").unwrap();
        vb.merge_into_global(&zset).unwrap();

        let z = zset.get(vb.did);
        let z = z.read().unwrap();
        assert_eq!(z.word_bytes(0), b"common");
        assert_eq!(z.word_bytes(1), b"rare");
        assert_eq!(vb.refs[0], B250::Word(1));
        assert_eq!(vb.refs[1], B250::Word(0));
    }

    #[test]
    fn second_block_reuses_global_words() {
        let zset = ContextSet::new();
        let mut vb1 = make_vbctx(&zset, ContextInit::stable_dict());
        vb1.seg(&zset, b"chr1").unwrap();
        vb1.merge_into_global(&zset).unwrap();

        let mut vb2 = make_vbctx(&zset, ContextInit::stable_dict());
        let w = vb2.evaluate(&zset, b"chr1").unwrap();
        assert_eq!(w & LOCAL_BIT, 0, "existing word found in global hash");
        assert_eq!(w, 0);
    }

    #[test]
    fn singletons_externalize_unless_disabled() {
        let zset = ContextSet::new();
        let mut vb = make_vbctx(&zset, ContextInit::dict());
        vb.seg(&zset, b"unique-identifier-1").unwrap();
        vb.seg(&zset, b"PASS").unwrap();
        vb.seg(&zset, b"PASS").unwrap();
        vb.merge_into_global(&zset).unwrap();

        let z = zset.get(vb.did);
        let z = z.read().unwrap();
        // PASS is a real word; the singleton became [SNIP_LOOKUP] + local.
        assert_eq!(z.num_words(), 2);
        assert!(z.lookup_word().is_some());
        assert_eq!(vb.local.as_slice(), b"unique-identifier-1\0");
    }

    #[test]
    fn merge_is_idempotent_across_blocks() {
        let zset = ContextSet::new();
        for _ in 0..3 {
            let mut vb = make_vbctx(&zset, ContextInit::stable_dict());
            vb.seg(&zset, b"chr1").unwrap();
            vb.seg(&zset, b"chr2").unwrap();
            vb.merge_into_global(&zset).unwrap();
        }
        let did = zset.handle_of(FieldId::new("TEST", Category::Primary)).unwrap();
        let z = zset.get(did);
        assert_eq!(z.read().unwrap().num_words(), 2);
    }

    #[test]
    fn b250_serialization_roundtrip_through_decode_cursor() {
        let zset = ContextSet::new();
        let mut vb = make_vbctx(&zset, ContextInit::stable_dict());
        vb.seg(&zset, b"a").unwrap();
        vb.seg(&zset, b"b").unwrap();
        vb.seg_empty();
        vb.seg(&zset, b"a").unwrap();
        vb.merge_into_global(&zset).unwrap();
        vb.serialize_b250().unwrap();

        let mut d = BlockContext::new_decode(vb.id, "TEST");
        d.b250.set(vb.b250.as_slice().to_vec());
        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(d.next_b250().unwrap());
        }
        assert_eq!(seen, vb.refs);
    }

    #[test]
    fn dict_fragment_roundtrip() {
        let id = FieldId::new("CHROM", Category::Primary);
        let mut ds = DictSet::default();
        ds.append_fragment(id, b"chr1\0chr2\0", 2).unwrap();
        ds.append_fragment(id, b"chrX\0", 1).unwrap();
        assert_eq!(ds.word(id, 0, "CHROM").unwrap(), b"chr1");
        assert_eq!(ds.word(id, 2, "CHROM").unwrap(), b"chrX");
        assert_eq!(ds.find(id, b"chr2"), Some(1));
        assert_eq!(ds.find(id, b"chr9"), None);
        assert!(ds.word(id, 3, "CHROM").is_err());
    }

    #[test]
    fn fixed_width_local_cursors() {
        let id = FieldId::new("NUM", Category::Primary);
        let mut ctx = BlockContext::new_decode(id, "NUM");
        ctx.ltype = LocalType::U32;
        ctx.push_local_u32(7);
        ctx.push_local_u32(1 << 20);
        assert_eq!(ctx.next_local_u32().unwrap(), 7);
        assert_eq!(ctx.next_local_u32().unwrap(), 1 << 20);
        assert!(ctx.next_local_u32().is_err());

        let mut ctx = BlockContext::new_decode(id, "NUM");
        ctx.ltype = LocalType::I32;
        ctx.push_local_i32(-42);
        assert_eq!(ctx.next_local_i32().unwrap(), -42);
    }

    #[test]
    fn one_up_disabled_for_format_category() {
        let id = FieldId::new("GT", Category::Format);
        let zset = ContextSet::new();
        let did = zset.get_or_create(id, "GT", ContextInit::dict());
        let vb = BlockContext::new(id, "GT", did, ContextInit::dict());
        assert!(!vb.one_up_allowed);
    }
}
