use byteorder::{
	LE,
	ReadBytesExt,
	WriteBytesExt
};

use std::collections::HashMap;
use std::io;
#[cfg(feature = "import")]
use std::io::Read;

use crate::chunk::FormatError;
use crate::gameobj::ObjId;

/// List terminator type code
pub const TYPE_END: u8 = 0x3F;
/// Mask extracting the type code from a record head byte
pub const TYPE_MASK: u8 = 0x3F;

/// Index written for a reference slot that points at nothing
pub const REF_NONE: u32 = 0xFFFF_FFFF;

/// Reference to a game object, resolved in a second pass once the whole
/// tree exists. A resolved slot counts toward the target's reference count.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum GORef {
	/// Table index read from the pack, not yet looked up
	Unresolved(u32),
	Resolved(ObjId),
	/// The index resolved to nothing; displayed as invalid, never fatal
	Invalid,
}

impl GORef {
	pub fn valid(&self) -> bool {
		matches!(self, GORef::Resolved(_))
	}

	pub fn get(&self) -> Option<ObjId> {
		match self {
			GORef::Resolved(id) => Some(*id),
			_ => None,
		}
	}
}

/// Typed payload of one property record
#[derive(Clone, Debug, PartialEq)]
pub enum DblValue {
	/// Type 7, opaque blob
	Data(Vec<u8>),
	/// Type 1
	Double(f64),
	/// Type 2
	Float(f32),
	/// Types 3, 0xA, 0xB, 0xC; storage is identical, only the display differs
	Int(u32),
	/// Type 0
	Null,
	/// Type 8
	Ref(GORef),
	/// Type 9
	RefList(Vec<GORef>),
	/// Type 6
	Separator,
	/// Types 4 and 5 (5 carries a filename)
	Text(String),
	/// Type 0x3F, kept as the list's last record
	Terminator,
	/// Any other type code; the rest of the blob is preserved untouched
	Unknown(Vec<u8>),
}

/// One property record: the raw head byte (type in the low six bits) plus
/// the decoded payload. The head is kept verbatim so that the flag bits and
/// the display-only distinction between the integer types survive a round
/// trip.
#[derive(Clone, Debug, PartialEq)]
pub struct DblEntry {
	pub head: u8,
	pub value: DblValue,
}

impl DblEntry {
	pub fn new(type_code: u8, value: DblValue) -> DblEntry {
		DblEntry { head: type_code & TYPE_MASK, value: value }
	}

	pub fn type_code(&self) -> u8 {
		self.head & TYPE_MASK
	}

	/// High nibble of the head byte, shown next to each record in the editor
	pub fn flag_nibble(&self) -> u8 {
		self.head >> 4
	}
}

/// Ordered property list of one object, decoded from its blob in the
/// `PDBL` pool.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DblList {
	pub flags: u8,
	pub entries: Vec<DblEntry>,
}

impl DblList {
	/// All reference slots in record order, list entries included
	pub fn refs(&self) -> impl Iterator<Item = &GORef> {
		self.entries.iter().flat_map(|e| {
			let slots: &[GORef] = match &e.value {
				DblValue::Ref(r) => std::slice::from_ref(r),
				DblValue::RefList(v) => v.as_slice(),
				_ => &[],
			};

			slots.iter()
		})
	}

	pub fn refs_mut(&mut self) -> impl Iterator<Item = &mut GORef> {
		self.entries.iter_mut().flat_map(|e| {
			let slots: &mut [GORef] = match &mut e.value {
				DblValue::Ref(r) => std::slice::from_mut(r),
				DblValue::RefList(v) => v.as_mut_slice(),
				_ => &mut [],
			};

			slots.iter_mut()
		})
	}

	/// Decodes the blob at `offset` in the property pool. The blob's head
	/// word holds its byte size in the low 24 bits and the list flags in
	/// the high 8; records follow until the terminator, which has to land
	/// exactly on the declared size.
	#[cfg(feature = "import")]
	pub fn read(pool: &[u8], offset: usize) -> Result<DblList, FormatError> {
		if offset + 4 > pool.len() {
			return Err(FormatError::Truncated { need: offset + 4, have: pool.len() });
		}

		let head = u32::from_le_bytes([pool[offset], pool[offset + 1], pool[offset + 2], pool[offset + 3]]);
		let size = (head & 0xFF_FFFF) as usize;
		if size < 4 || offset + size > pool.len() {
			return Err(FormatError::Truncated { need: offset + size, have: pool.len() });
		}

		let mut list = DblList {
			flags: (head >> 24) as u8,
			entries: vec![],
		};

		let mut buf = &pool[offset + 4..offset + size];
		loop {
			if buf.is_empty() {
				// Ran out of records without seeing the terminator.
				return Err(FormatError::Terminator);
			}

			let rec_head = buf.read_u8()?;
			let value = match rec_head & TYPE_MASK {
				0 => DblValue::Null,
				1 => DblValue::Double(buf.read_f64::<LE>()?),
				2 => DblValue::Float(buf.read_f32::<LE>()?),
				3 | 0xA | 0xB | 0xC => DblValue::Int(buf.read_u32::<LE>()?),
				4 | 5 => {
					let len = buf.read_u32::<LE>()? as usize;
					let mut s = String::new();
					for _ in 0..len {
						s.push(buf.read_u8()? as char);
					}

					DblValue::Text(s)
				},
				6 => DblValue::Separator,
				7 => {
					let len = buf.read_u32::<LE>()? as usize;
					let mut data = vec![0; len];
					buf.read_exact(data.as_mut_slice())?;

					DblValue::Data(data)
				},
				8 => DblValue::Ref(GORef::Unresolved(buf.read_u32::<LE>()?)),
				9 => {
					let count = buf.read_u32::<LE>()? as usize;
					let mut v = vec![];
					for _ in 0..count {
						v.push(GORef::Unresolved(buf.read_u32::<LE>()?));
					}

					DblValue::RefList(v)
				},
				TYPE_END => {
					list.entries.push(DblEntry { head: rec_head, value: DblValue::Terminator });
					if !buf.is_empty() {
						return Err(FormatError::Terminator);
					}

					break;
				},
				_ => {
					// Unknown payload length; keep everything up to the
					// declared end so the blob re-encodes byte for byte.
					list.entries.push(DblEntry { head: rec_head, value: DblValue::Unknown(buf.to_vec()) });
					break;
				},
			};

			list.entries.push(DblEntry { head: rec_head, value: value });
		}

		Ok(list)
	}

	/// Encoded byte size, head word included
	pub fn byte_size(&self) -> u32 {
		4 + self.entries.iter().map(|e| 1 + match &e.value {
			DblValue::Data(data) => 4 + data.len() as u32,
			DblValue::Double(_) => 8,
			DblValue::Float(_) => 4,
			DblValue::Int(_) => 4,
			DblValue::Null => 0,
			DblValue::Ref(_) => 4,
			DblValue::RefList(v) => 4 + 4 * v.len() as u32,
			DblValue::Separator => 0,
			DblValue::Text(s) => 4 + s.chars().count() as u32,
			DblValue::Terminator => 0,
			DblValue::Unknown(data) => data.len() as u32,
		}).sum::<u32>()
	}

	/// Appends the blob to the property pool. Resolved references are
	/// written as the target's position in `order`; anything else becomes
	/// [`REF_NONE`].
	#[cfg(feature = "export")]
	pub fn write<W>(&self, buf: &mut W, order: &HashMap<ObjId, u32>) -> io::Result<()>
	where
		W: WriteBytesExt,
	{
		buf.write_u32::<LE>(self.byte_size() & 0xFF_FFFF | (self.flags as u32) << 24)?;

		for e in self.entries.iter() {
			buf.write_u8(e.head)?;
			match &e.value {
				DblValue::Data(data) => {
					buf.write_u32::<LE>(data.len() as u32)?;
					buf.write_all(data.as_slice())?;
				},
				DblValue::Double(v) => buf.write_f64::<LE>(*v)?,
				DblValue::Float(v) => buf.write_f32::<LE>(*v)?,
				DblValue::Int(v) => buf.write_u32::<LE>(*v)?,
				DblValue::Null => {},
				DblValue::Ref(r) => buf.write_u32::<LE>(at_rest(r, order))?,
				DblValue::RefList(v) => {
					buf.write_u32::<LE>(v.len() as u32)?;
					for r in v.iter() {
						buf.write_u32::<LE>(at_rest(r, order))?;
					}
				},
				DblValue::Separator => {},
				DblValue::Text(s) => {
					buf.write_u32::<LE>(s.chars().count() as u32)?;
					for c in s.chars() {
						buf.write_u8(c as u8)?;
					}
				},
				DblValue::Terminator => {},
				DblValue::Unknown(data) => buf.write_all(data.as_slice())?,
			}
		}

		Ok(())
	}
}

#[cfg(feature = "export")]
fn at_rest(r: &GORef, order: &HashMap<ObjId, u32>) -> u32 {
	match r {
		GORef::Unresolved(index) => *index,
		GORef::Resolved(id) => match order.get(id) {
			Some(index) => *index,
			None => REF_NONE,
		},
		GORef::Invalid => REF_NONE,
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn sample_blob() -> Vec<u8> {
		let mut blob = vec![];
		blob.extend_from_slice(&0u32.to_le_bytes()); // patched below

		blob.push(2); // f32
		blob.extend_from_slice(&1.5f32.to_le_bytes());
		blob.push(0x4A); // int type 0xA with flag bits set
		blob.extend_from_slice(&7u32.to_le_bytes());
		blob.push(5); // filename
		blob.extend_from_slice(&3u32.to_le_bytes());
		blob.extend_from_slice(b"a.c");
		blob.push(8); // single reference
		blob.extend_from_slice(&1u32.to_le_bytes());
		blob.push(9); // reference list
		blob.extend_from_slice(&2u32.to_le_bytes());
		blob.extend_from_slice(&0u32.to_le_bytes());
		blob.extend_from_slice(&REF_NONE.to_le_bytes());
		blob.push(6); // separator
		blob.push(TYPE_END);

		let size = blob.len() as u32;
		blob[0..4].copy_from_slice(&(size | 0xAB << 24).to_le_bytes());
		blob
	}

	#[cfg(feature = "import")]
	#[test]
	fn test_read() {
		let list = DblList::read(sample_blob().as_slice(), 0).unwrap();
		assert_eq!(list.flags, 0xAB);
		assert_eq!(list.entries.len(), 7);
		assert_eq!(list.entries[0].value, DblValue::Float(1.5));
		assert_eq!(list.entries[1].type_code(), 0xA);
		assert_eq!(list.entries[1].flag_nibble(), 4);
		assert_eq!(list.entries[2].value, DblValue::Text("a.c".to_string()));
		assert_eq!(list.entries[3].value, DblValue::Ref(GORef::Unresolved(1)));
		assert_eq!(list.entries[6].value, DblValue::Terminator);
		assert_eq!(list.refs().count(), 3);
	}

	#[cfg(all(feature = "import", feature = "export"))]
	#[test]
	fn test_round_trip() {
		let blob = sample_blob();
		let list = DblList::read(blob.as_slice(), 0).unwrap();
		assert_eq!(list.byte_size() as usize, blob.len());

		let mut out = vec![];
		list.write(&mut out, &HashMap::new()).unwrap();
		assert_eq!(out, blob);
	}

	#[cfg(all(feature = "import", feature = "export"))]
	#[test]
	fn test_unknown_type_survives() {
		let mut blob = vec![];
		blob.extend_from_slice(&10u32.to_le_bytes());
		blob.push(0x21); // no such type
		blob.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF, 0x3F]);

		let list = DblList::read(blob.as_slice(), 0).unwrap();
		assert_eq!(list.entries.len(), 1);
		assert_eq!(list.entries[0].value, DblValue::Unknown(vec![0xDE, 0xAD, 0xBE, 0xEF, 0x3F]));

		let mut out = vec![];
		list.write(&mut out, &HashMap::new()).unwrap();
		assert_eq!(out, blob);
	}

	#[cfg(feature = "import")]
	#[test]
	fn test_early_terminator() {
		let mut blob = vec![];
		blob.extend_from_slice(&7u32.to_le_bytes());
		blob.push(TYPE_END);
		blob.extend_from_slice(&[0, 0]); // declared size says two more bytes

		assert!(matches!(DblList::read(blob.as_slice(), 0), Err(FormatError::Terminator)));
	}

	#[cfg(feature = "import")]
	#[test]
	fn test_missing_terminator() {
		let mut blob = vec![];
		blob.extend_from_slice(&9u32.to_le_bytes());
		blob.push(2);
		blob.extend_from_slice(&1.0f32.to_le_bytes());

		assert!(matches!(DblList::read(blob.as_slice(), 0), Err(FormatError::Terminator)));
	}
}
