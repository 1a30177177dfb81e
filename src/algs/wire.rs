//! Fixed, versioned, little-endian wire types for the transfer messages.
//!
//! Fixed-size tables are `bytemuck` records copied verbatim; the variable
//! object memory area is written with `bytes::BufMut` and read back with the
//! bounds-checked [`MemReader`].

use bytemuck::{Pod, Zeroable};
use bytes::{Buf, BufMut};
use std::mem::{align_of, size_of};

/// Bump when the layout or semantics change in incompatible ways.
pub const WIRE_VERSION: u16 = 1;

pub const KIND_OBJ_MSG: u16 = 1;
pub const KIND_CPL_MSG: u16 = 2;
pub const KIND_PRUNE_MSG: u16 = 3;

/// All multi-byte integers in these structs are **little-endian** on the wire.
/// We store them pre-LE with `.to_le()` and decode with `.from_le()`.

// ===== Common records ======================================================

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireHdr {
    pub version_le: u16,
    pub kind_le: u16,
    pub reserved_le: u32,
}

impl WireHdr {
    pub fn new(kind: u16) -> Self {
        Self {
            version_le: WIRE_VERSION.to_le(),
            kind_le: kind.to_le(),
            reserved_le: 0,
        }
    }
    pub fn kind(&self) -> u16 {
        u16::from_le(self.kind_le)
    }
    pub fn version(&self) -> u16 {
        u16::from_le(self.version_le)
    }
}

/// Byte length announced in the size stage of an exchange.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireLen {
    pub n_le: u64,
}
impl WireLen {
    pub fn new(n: usize) -> Self {
        Self {
            n_le: (n as u64).to_le(),
        }
    }
    pub fn get(&self) -> usize {
        u64::from_le(self.n_le) as usize
    }
}

/// A bare GID (symbol table slot, delete notice, prune announcement).
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireGid {
    pub gid_le: u64,
}
impl WireGid {
    pub fn of(gid: u64) -> Self {
        Self { gid_le: gid.to_le() }
    }
    pub fn get(&self) -> u64 {
        u64::from_le(self.gid_le)
    }
}

// ===== Phase 1: object messages ============================================

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireObjMsgHdr {
    pub n_obj_le: u32,
    pub n_sym_le: u32,
    pub n_newcpl_le: u32,
    pub n_oldcpl_le: u32,
    pub mem_len_le: u64,
}
impl WireObjMsgHdr {
    pub fn new(
        n_obj: usize,
        n_sym: usize,
        n_newcpl: usize,
        n_oldcpl: usize,
        mem_len: usize,
    ) -> Self {
        Self {
            n_obj_le: (n_obj as u32).to_le(),
            n_sym_le: (n_sym as u32).to_le(),
            n_newcpl_le: (n_newcpl as u32).to_le(),
            n_oldcpl_le: (n_oldcpl as u32).to_le(),
            mem_len_le: (mem_len as u64).to_le(),
        }
    }
    pub fn counts(&self) -> (usize, usize, usize, usize, usize) {
        (
            u32::from_le(self.n_obj_le) as usize,
            u32::from_le(self.n_sym_le) as usize,
            u32::from_le(self.n_newcpl_le) as usize,
            u32::from_le(self.n_oldcpl_le) as usize,
            u64::from_le(self.mem_len_le) as usize,
        )
    }
}

/// Object table entry. `offset` points into the memory area, where the object
/// occupies `size` payload bytes, `n_refs` u32 symbol indices, then `aux_len`
/// bytes of auxiliary blocks.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireObjEntry {
    pub gid_le: u64,
    pub offset_le: u64,
    pub size_le: u32,
    pub n_refs_le: u32,
    pub aux_len_le: u32,
    pub attr_le: u32,
    pub typ_le: u16,
    pub prio: u8,
    pub _pad: [u8; 5],
}

impl WireObjEntry {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gid: u64,
        typ: u16,
        prio: u8,
        attr: u32,
        offset: usize,
        size: usize,
        n_refs: usize,
        aux_len: usize,
    ) -> Self {
        Self {
            gid_le: gid.to_le(),
            offset_le: (offset as u64).to_le(),
            size_le: (size as u32).to_le(),
            n_refs_le: (n_refs as u32).to_le(),
            aux_len_le: (aux_len as u32).to_le(),
            attr_le: attr.to_le(),
            typ_le: typ.to_le(),
            prio,
            _pad: [0; 5],
        }
    }
    pub fn gid(&self) -> u64 {
        u64::from_le(self.gid_le)
    }
    pub fn typ(&self) -> u16 {
        u16::from_le(self.typ_le)
    }
    pub fn attr(&self) -> u32 {
        u32::from_le(self.attr_le)
    }
    pub fn offset(&self) -> usize {
        u64::from_le(self.offset_le) as usize
    }
    /// `(size, n_refs, aux_len)`.
    pub fn lens(&self) -> (usize, usize, usize) {
        (
            u32::from_le(self.size_le) as usize,
            u32::from_le(self.n_refs_le) as usize,
            u32::from_le(self.aux_len_le) as usize,
        )
    }
}

/// Coupling hint `(gid, proc, prio)`; also used for Phase-2 add notices.
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireCpl {
    pub gid_le: u64,
    pub proc_le: u32,
    pub prio: u8,
    pub _pad: [u8; 3],
}
impl WireCpl {
    pub fn new(gid: u64, proc: u32, prio: u8) -> Self {
        Self {
            gid_le: gid.to_le(),
            proc_le: proc.to_le(),
            prio,
            _pad: [0; 3],
        }
    }
    pub fn decode(&self) -> (u64, u32, u8) {
        (u64::from_le(self.gid_le), u32::from_le(self.proc_le), self.prio)
    }
}

// ===== Phase 2: coupling messages ==========================================

#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireCplMsgHdr {
    pub n_del_le: u32,
    pub n_add_le: u32,
    pub n_mod_le: u32,
    pub _pad: u32,
}
impl WireCplMsgHdr {
    pub fn new(n_del: usize, n_add: usize, n_mod: usize) -> Self {
        Self {
            n_del_le: (n_del as u32).to_le(),
            n_add_le: (n_add as u32).to_le(),
            n_mod_le: (n_mod as u32).to_le(),
            _pad: 0,
        }
    }
    pub fn counts(&self) -> (usize, usize, usize) {
        (
            u32::from_le(self.n_del_le) as usize,
            u32::from_le(self.n_add_le) as usize,
            u32::from_le(self.n_mod_le) as usize,
        )
    }
}

/// "My copy of `gid` now has priority `prio`."
#[repr(C)]
#[derive(Copy, Clone, Pod, Zeroable)]
pub struct WireModCpl {
    pub gid_le: u64,
    pub prio: u8,
    pub _pad: [u8; 7],
}
impl WireModCpl {
    pub fn new(gid: u64, prio: u8) -> Self {
        Self {
            gid_le: gid.to_le(),
            prio,
            _pad: [0; 7],
        }
    }
    pub fn decode(&self) -> (u64, u8) {
        (u64::from_le(self.gid_le), self.prio)
    }
}

// ===== Compile-time sanity checks =========================================

static_assertions::const_assert_eq!(size_of::<WireHdr>(), 8);
static_assertions::const_assert_eq!(size_of::<WireLen>(), 8);
static_assertions::const_assert_eq!(size_of::<WireGid>(), 8);
static_assertions::const_assert_eq!(size_of::<WireObjMsgHdr>(), 24);
static_assertions::const_assert_eq!(size_of::<WireObjEntry>(), 40);
static_assertions::const_assert_eq!(align_of::<WireObjEntry>(), 8);
static_assertions::const_assert_eq!(size_of::<WireCpl>(), 16);
static_assertions::const_assert_eq!(size_of::<WireCplMsgHdr>(), 16);
static_assertions::const_assert_eq!(size_of::<WireModCpl>(), 16);

// ===== Encoding helpers =====================================================

/// Append one record.
pub fn put_pod<T: Pod>(out: &mut Vec<u8>, rec: &T) {
    out.extend_from_slice(bytemuck::bytes_of(rec));
}

/// Append a slice of records.
pub fn put_pods<T: Pod>(out: &mut Vec<u8>, recs: &[T]) {
    out.extend_from_slice(bytemuck::cast_slice(recs));
}

/// Bounds-checked reader over a received buffer.
///
/// Received buffers carry no alignment guarantee, so records are copied out
/// with `pod_read_unaligned`.
pub struct MemReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> MemReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8], String> {
        if self.remaining() < n {
            return Err(format!(
                "need {n} bytes at offset {}, only {} left",
                self.pos,
                self.remaining()
            ));
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(s)
    }

    pub fn pod<T: Pod>(&mut self) -> Result<T, String> {
        let bytes = self.take(size_of::<T>())?;
        Ok(bytemuck::pod_read_unaligned(bytes))
    }

    pub fn pods<T: Pod>(&mut self, n: usize) -> Result<Vec<T>, String> {
        let len = n
            .checked_mul(size_of::<T>())
            .ok_or_else(|| format!("record count {n} overflows"))?;
        let bytes = self.take(len)?;
        Ok(bytes
            .chunks_exact(size_of::<T>())
            .map(bytemuck::pod_read_unaligned)
            .collect())
    }

    pub fn u8(&mut self) -> Result<u8, String> {
        let mut b = self.take(1)?;
        Ok(b.get_u8())
    }

    pub fn u16(&mut self) -> Result<u16, String> {
        let mut b = self.take(2)?;
        Ok(b.get_u16_le())
    }

    pub fn u32(&mut self) -> Result<u32, String> {
        let mut b = self.take(4)?;
        Ok(b.get_u32_le())
    }

    /// Fail unless the whole buffer was consumed.
    pub fn finish(&self) -> Result<(), String> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(format!("{n} trailing bytes")),
        }
    }
}

/// Writer for the variable object memory area.
#[derive(Default)]
pub struct MemWriter {
    buf: Vec<u8>,
}

impl MemWriter {
    pub fn len(&self) -> usize {
        self.buf.len()
    }
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
    pub fn put_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }
    pub fn put_u16(&mut self, v: u16) {
        self.buf.put_u16_le(v);
    }
    pub fn put_u32(&mut self, v: u32) {
        self.buf.put_u32_le(v);
    }
    pub fn put_slice(&mut self, s: &[u8]) {
        self.buf.put_slice(s);
    }
    /// Overwrite a previously written u32 (symbol index back-patching).
    pub fn patch_u32(&mut self, at: usize, v: u32) {
        self.buf[at..at + 4].copy_from_slice(&v.to_le_bytes());
    }
    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpl_record_roundtrip() {
        let mut out = Vec::new();
        put_pods(&mut out, &[WireCpl::new(42, 2, 1), WireCpl::new(7, 0, 3)]);
        let mut r = MemReader::new(&out);
        let v: Vec<WireCpl> = r.pods(2).unwrap();
        assert_eq!(v[0].decode(), (42, 2, 1));
        assert_eq!(v[1].decode(), (7, 0, 3));
        r.finish().unwrap();
    }

    #[test]
    fn unaligned_read() {
        let mut out = vec![0xFFu8];
        put_pod(&mut out, &WireGid::of(0x1122_3344_5566_7788));
        let mut r = MemReader::new(&out);
        r.u8().unwrap();
        assert_eq!(r.pod::<WireGid>().unwrap().get(), 0x1122_3344_5566_7788);
    }

    #[test]
    fn short_buffer_is_an_error() {
        let mut r = MemReader::new(&[1, 2, 3]);
        assert!(r.u32().is_err());
    }

    #[test]
    fn patch_in_place() {
        let mut w = MemWriter::default();
        w.put_u32(0);
        w.put_u8(9);
        w.patch_u32(0, 5);
        let buf = w.into_inner();
        let mut r = MemReader::new(&buf);
        assert_eq!(r.u32().unwrap(), 5);
        assert_eq!(r.u8().unwrap(), 9);
    }

    #[test]
    fn version_guard() {
        let hdr = WireHdr::new(KIND_OBJ_MSG);
        assert_eq!(hdr.version(), WIRE_VERSION);
        assert_eq!(hdr.kind(), KIND_OBJ_MSG);
    }
}
