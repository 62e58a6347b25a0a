use byteorder::{
	LE,
	WriteBytesExt
};

use std::io;
use thiserror::Error;

use spk_core::rtag4;

use crate::geo::GeoError;

/// Top-level scene pack container
pub const TAG_PACK: u32 = rtag4!(b"PACK");
/// Vertex coordinate pool, `f32` triples
pub const TAG_PVER: u32 = rtag4!(b"PVER");
/// Face index pool, `u16` entries
pub const TAG_PFAC: u32 = rtag4!(b"PFAC");
/// Face-material header pool
pub const TAG_PFTX: u32 = rtag4!(b"PFTX");
/// UV coordinate pool, `f32` pairs
pub const TAG_PUVC: u32 = rtag4!(b"PUVC");
/// Property list pool, one blob per object
pub const TAG_PDBL: u32 = rtag4!(b"PDBL");
/// Animation pool, embedded `HEAD` chunks addressed by object offsets
pub const TAG_PEXC: u32 = rtag4!(b"PEXC");
/// Object tree container, one record chunk per object in pre-order
pub const TAG_POBJ: u32 = rtag4!(b"POBJ");
/// Texture/palette container
pub const TAG_PALC: u32 = rtag4!(b"PALC");
/// Root of an embedded animation chunk tree
pub const TAG_HEAD: u32 = rtag4!(b"HEAD");
/// Animation key list, multi-block payload
pub const TAG_KEYS: u32 = rtag4!(b"KEYS");

pub const HEADER_SIZE: u32 = 8;

#[derive(Debug, Error)]
pub enum FormatError {
	#[error("sub-block count overruns the declared size of chunk {tag:08X}")]
	BlockCount { tag: u32 },
	#[error("mesh addresses data outside the geometry buffers")]
	Geometry {
		#[from]
		source: GeoError,
	},
	#[error("I/O error")]
	IO {
		#[from]
		source: io::Error,
	},
	#[error("missing required chunk {0:08X}")]
	Missing(u32),
	#[error("object record has a forward or out-of-range parent index {0}")]
	Parent(u32),
	#[error("object record chunk {0:08X} is not a raw payload")]
	Record(u32),
	#[error("declared size of chunk {tag:08X} disagrees with its contents ({declared} vs {consumed})")]
	Size { tag: u32, declared: u32, consumed: u32 },
	#[error("expected chunk {expected:08X}, found {found:08X}")]
	Tag { expected: u32, found: u32 },
	#[error("property list is unterminated or its terminator disagrees with the declared size")]
	Terminator,
	#[error("trailing bytes after the record in chunk {0:08X}")]
	Trailing(u32),
	#[error("chunk truncated: need {need} bytes, have {have}")]
	Truncated { need: usize, have: usize },
}

/// A chunk's payload is one of three shapes. Which shape a given chunk uses
/// is fixed by its tag; nothing in the encoded bytes says so.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
	/// Ordered length-prefixed sub-blocks
	Blocks(Vec<Vec<u8>>),
	/// Ordered nested chunks filling the declared size
	Children(Vec<Chunk>),
	/// Opaque bytes
	Raw(Vec<u8>),
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum PayloadKind {
	Blocks,
	Children,
	Raw,
}

fn payload_kind(tag: u32) -> PayloadKind {
	match tag {
		TAG_PACK | TAG_POBJ | TAG_PALC | TAG_HEAD => PayloadKind::Children,
		TAG_KEYS => PayloadKind::Blocks,
		// Unrecognized tags stay opaque so foreign data survives a round trip.
		_ => PayloadKind::Raw,
	}
}

/// Tagged hierarchical binary record, the pack's universal container unit.
///
/// The wire header is the tag followed by a `u32` size covering header and
/// payload. Nested chunks are decoded back-to-back until the declared size
/// is exhausted.
#[derive(Clone, Debug, PartialEq)]
pub struct Chunk {
	pub tag: u32,
	pub payload: Payload,
}

impl Chunk {
	pub fn raw(&self) -> Option<&[u8]> {
		match &self.payload {
			Payload::Raw(data) => Some(data.as_slice()),
			_ => None,
		}
	}

	pub fn blocks(&self) -> Option<&[Vec<u8>]> {
		match &self.payload {
			Payload::Blocks(blocks) => Some(blocks.as_slice()),
			_ => None,
		}
	}

	pub fn children(&self) -> Option<&[Chunk]> {
		match &self.payload {
			Payload::Children(subs) => Some(subs.as_slice()),
			_ => None,
		}
	}

	/// Returns the first immediate child with the given tag
	pub fn find_subchunk(&self, tag: u32) -> Option<&Chunk> {
		self.children()?.iter().find(|c| c.tag == tag)
	}

	/// Encoded size of this chunk, header included
	pub fn size(&self) -> u32 {
		let payload = match &self.payload {
			Payload::Blocks(blocks) => 4 + blocks.iter().map(|b| 4 + b.len() as u32).sum::<u32>(),
			Payload::Children(subs) => subs.iter().map(Chunk::size).sum(),
			Payload::Raw(data) => data.len() as u32,
		};

		HEADER_SIZE + payload
	}

	/// Decodes a chunk tree that spans the whole input
	#[cfg(feature = "import")]
	pub fn read(buf: &[u8]) -> Result<Chunk, FormatError> {
		let (chunk, used) = Chunk::read_prefix(buf)?;
		if used != buf.len() {
			return Err(FormatError::Size {
				tag: chunk.tag,
				declared: used as u32,
				consumed: buf.len() as u32,
			});
		}

		Ok(chunk)
	}

	/// Decodes one chunk from the start of the input, tolerating trailing
	/// data. Returns the chunk and the number of bytes it occupied.
	#[cfg(feature = "import")]
	pub fn read_prefix(buf: &[u8]) -> Result<(Chunk, usize), FormatError> {
		if buf.len() < HEADER_SIZE as usize {
			return Err(FormatError::Truncated {
				need: HEADER_SIZE as usize,
				have: buf.len(),
			});
		}

		let tag = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
		let size = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]) as usize;

		if size < HEADER_SIZE as usize || size > buf.len() {
			return Err(FormatError::Truncated {
				need: size,
				have: buf.len(),
			});
		}

		let body = &buf[HEADER_SIZE as usize..size];
		let payload = match payload_kind(tag) {
			PayloadKind::Blocks => Payload::Blocks(Chunk::read_blocks(tag, body)?),
			PayloadKind::Children => {
				let mut subs = vec![];
				let mut off = 0;
				while off < body.len() {
					let (sub, used) = Chunk::read_prefix(&body[off..])?;
					subs.push(sub);
					off += used;
				}

				Payload::Children(subs)
			},
			PayloadKind::Raw => Payload::Raw(body.to_vec()),
		};

		Ok((Chunk { tag: tag, payload: payload }, size))
	}

	#[cfg(feature = "import")]
	fn read_blocks(tag: u32, body: &[u8]) -> Result<Vec<Vec<u8>>, FormatError> {
		if body.len() < 4 {
			return Err(FormatError::Truncated { need: 4, have: body.len() });
		}

		let count = u32::from_le_bytes([body[0], body[1], body[2], body[3]]) as usize;
		if 4 + count * 4 > body.len() {
			return Err(FormatError::BlockCount { tag: tag });
		}

		let mut blocks = vec![];
		let mut off = 4;
		for _ in 0..count {
			if off + 4 > body.len() {
				return Err(FormatError::BlockCount { tag: tag });
			}

			let len = u32::from_le_bytes([body[off], body[off + 1], body[off + 2], body[off + 3]]) as usize;
			off += 4;
			if off + len > body.len() {
				return Err(FormatError::BlockCount { tag: tag });
			}

			blocks.push(body[off..off + len].to_vec());
			off += len;
		}

		if off != body.len() {
			return Err(FormatError::Size {
				tag: tag,
				declared: body.len() as u32 + HEADER_SIZE,
				consumed: off as u32 + HEADER_SIZE,
			});
		}

		Ok(blocks)
	}

	#[cfg(feature = "export")]
	pub fn write<W>(&self, buf: &mut W) -> io::Result<()>
	where
		W: WriteBytesExt,
	{
		buf.write_u32::<LE>(self.tag)?;
		buf.write_u32::<LE>(self.size())?;

		match &self.payload {
			Payload::Blocks(blocks) => {
				buf.write_u32::<LE>(blocks.len() as u32)?;
				for block in blocks.iter() {
					buf.write_u32::<LE>(block.len() as u32)?;
					buf.write_all(block.as_slice())?;
				}
			},
			Payload::Children(subs) => {
				for sub in subs.iter() {
					sub.write(buf)?;
				}
			},
			Payload::Raw(data) => buf.write_all(data.as_slice())?,
		}

		Ok(())
	}

	#[cfg(feature = "export")]
	pub fn to_bytes(&self) -> Vec<u8> {
		let mut data = Vec::with_capacity(self.size() as usize);
		// Writing into a Vec cannot fail.
		let _ = self.write(&mut data);
		data
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn sample_pack() -> Vec<u8> {
		let mut data = vec![];

		// PACK containing one raw PVER and a KEYS chunk with two blocks
		data.extend_from_slice(&TAG_PACK.to_le_bytes());
		data.extend_from_slice(&49u32.to_le_bytes());

		data.extend_from_slice(&TAG_PVER.to_le_bytes());
		data.extend_from_slice(&12u32.to_le_bytes());
		data.extend_from_slice(&[1, 2, 3, 4]);

		data.extend_from_slice(&TAG_KEYS.to_le_bytes());
		data.extend_from_slice(&29u32.to_le_bytes());
		data.extend_from_slice(&2u32.to_le_bytes());
		data.extend_from_slice(&4u32.to_le_bytes());
		data.extend_from_slice(&7u32.to_le_bytes());
		data.extend_from_slice(&5u32.to_le_bytes());
		data.extend_from_slice(b"hello");

		data
	}

	#[cfg(feature = "import")]
	#[test]
	fn test_read() {
		let chunk = Chunk::read(sample_pack().as_slice()).unwrap();
		assert_eq!(chunk.tag, TAG_PACK);
		assert_eq!(chunk.children().unwrap().len(), 2);
		assert_eq!(chunk.find_subchunk(TAG_PVER).unwrap().raw().unwrap(), &[1, 2, 3, 4]);
		assert!(chunk.find_subchunk(TAG_PFAC).is_none());

		let keys = chunk.find_subchunk(TAG_KEYS).unwrap();
		assert_eq!(keys.blocks().unwrap(), &[7u32.to_le_bytes().to_vec(), b"hello".to_vec()]);
	}

	#[cfg(all(feature = "import", feature = "export"))]
	#[test]
	fn test_round_trip() {
		let data = sample_pack();
		let chunk = Chunk::read(data.as_slice()).unwrap();
		assert_eq!(chunk.size() as usize, data.len());
		assert_eq!(chunk.to_bytes(), data);
	}

	#[cfg(feature = "import")]
	#[test]
	fn test_truncated_header() {
		assert!(matches!(Chunk::read(&[0; 5]), Err(FormatError::Truncated { .. })));
	}

	#[cfg(feature = "import")]
	#[test]
	fn test_child_overrun() {
		let mut data = vec![];
		data.extend_from_slice(&TAG_PACK.to_le_bytes());
		data.extend_from_slice(&16u32.to_le_bytes());
		// Child declares 12 bytes but only 8 fit in the container.
		data.extend_from_slice(&TAG_PVER.to_le_bytes());
		data.extend_from_slice(&12u32.to_le_bytes());

		assert!(Chunk::read(data.as_slice()).is_err());
	}

	#[cfg(feature = "import")]
	#[test]
	fn test_block_count_overrun() {
		let mut data = vec![];
		data.extend_from_slice(&TAG_KEYS.to_le_bytes());
		data.extend_from_slice(&12u32.to_le_bytes());
		data.extend_from_slice(&100u32.to_le_bytes());

		assert!(matches!(Chunk::read(data.as_slice()), Err(FormatError::BlockCount { tag: TAG_KEYS })));
	}

	#[cfg(feature = "import")]
	#[test]
	fn test_trailing_garbage() {
		let mut data = sample_pack();
		data.push(0);
		assert!(matches!(Chunk::read(data.as_slice()), Err(FormatError::Size { .. })));
	}

	#[cfg(feature = "import")]
	#[test]
	fn test_unknown_tag_stays_raw() {
		let mut data = vec![];
		data.extend_from_slice(&rtag4!(b"WHAT").to_le_bytes());
		data.extend_from_slice(&11u32.to_le_bytes());
		data.extend_from_slice(&[9, 9, 9]);

		let chunk = Chunk::read(data.as_slice()).unwrap();
		assert_eq!(chunk.raw().unwrap(), &[9, 9, 9]);
	}
}
