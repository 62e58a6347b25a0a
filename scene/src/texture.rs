use byteorder::{
	LE,
	ReadBytesExt,
	WriteBytesExt
};

use std::io;

use crate::chunk::Chunk;
#[cfg(feature = "import")]
use crate::chunk::FormatError;

/// Fixed length of the name field in a texture header
pub const TEX_NAME_LEN: usize = 32;

/// Header every texture chunk in the palette container starts with; the
/// pixel data follows it and stays opaque to the editor core.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TexInfo {
	pub id: u32,
	pub width: u32,
	pub height: u32,
	pub num_mipmaps: u32,
	pub flags: u32,
	pub reserved: u32,
	pub name: String,
}

impl TexInfo {
	#[cfg(feature = "import")]
	pub fn read<R>(buf: &mut R) -> Result<TexInfo, FormatError>
	where
		R: ReadBytesExt,
	{
		let id = buf.read_u32::<LE>()?;
		let width = buf.read_u32::<LE>()?;
		let height = buf.read_u32::<LE>()?;
		let num_mipmaps = buf.read_u32::<LE>()?;
		let flags = buf.read_u32::<LE>()?;
		let reserved = buf.read_u32::<LE>()?;

		let mut raw = [0; TEX_NAME_LEN];
		buf.read_exact(&mut raw)?;
		let mut name = String::new();
		for &b in raw.iter() {
			if b == 0 {
				break;
			}

			name.push(b as char);
		}

		Ok(TexInfo {
			id: id,
			width: width,
			height: height,
			num_mipmaps: num_mipmaps,
			flags: flags,
			reserved: reserved,
			name: name,
		})
	}

	#[cfg(feature = "export")]
	pub fn write<W>(&self, buf: &mut W) -> io::Result<()>
	where
		W: WriteBytesExt,
	{
		buf.write_u32::<LE>(self.id)?;
		buf.write_u32::<LE>(self.width)?;
		buf.write_u32::<LE>(self.height)?;
		buf.write_u32::<LE>(self.num_mipmaps)?;
		buf.write_u32::<LE>(self.flags)?;
		buf.write_u32::<LE>(self.reserved)?;

		let mut raw = [0; TEX_NAME_LEN];
		for (i, c) in self.name.chars().take(TEX_NAME_LEN - 1).enumerate() {
			raw[i] = c as u8;
		}

		buf.write_all(&raw)?;
		Ok(())
	}
}

/// Finds the texture chunk with the given id in the palette container.
/// Only the leading id word is inspected, the rest of the header stays
/// untouched.
pub fn find_texture(pack: &Chunk, id: u32) -> Option<&Chunk> {
	pack.children()?.iter().find(|c| match c.raw() {
		Some(data) if data.len() >= 4 => u32::from_le_bytes([data[0], data[1], data[2], data[3]]) == id,
		_ => false,
	})
}

/// Ids of every texture chunk in the container, in pack order
pub fn texture_ids(pack: &Chunk) -> Vec<u32> {
	match pack.children() {
		Some(subs) => subs
			.iter()
			.filter_map(|c| c.raw())
			.filter(|data| data.len() >= 4)
			.map(|data| u32::from_le_bytes([data[0], data[1], data[2], data[3]]))
			.collect(),
		None => vec![],
	}
}

#[cfg(test)]
mod tests {
	use spk_core::rtag4;

	use crate::chunk::{
		Payload,
		TAG_PALC
	};

	use super::*;

	fn sample_info(id: u32, name: &str) -> TexInfo {
		TexInfo {
			id: id,
			width: 128,
			height: 64,
			num_mipmaps: 3,
			flags: 0x11,
			reserved: 0,
			name: name.to_string(),
		}
	}

	#[cfg(all(feature = "import", feature = "export"))]
	#[test]
	fn test_round_trip() {
		let info = sample_info(7, "Wood01");
		let mut data = vec![];
		info.write(&mut data).unwrap();
		assert_eq!(data.len(), 24 + TEX_NAME_LEN);
		assert_eq!(TexInfo::read(&mut data.as_slice()).unwrap(), info);
	}

	#[cfg(feature = "export")]
	#[test]
	fn test_find_texture() {
		let mut subs = vec![];
		for (id, name) in [(3, "A"), (9, "B")] {
			let mut data = vec![];
			sample_info(id, name).write(&mut data).unwrap();
			data.extend_from_slice(&[0xAA; 16]); // pixel data
			subs.push(Chunk { tag: rtag4!(b"PALN"), payload: Payload::Raw(data) });
		}

		let pack = Chunk { tag: TAG_PALC, payload: Payload::Children(subs) };
		assert!(find_texture(&pack, 3).is_some());
		assert!(find_texture(&pack, 4).is_none());
		assert_eq!(texture_ids(&pack), vec![3, 9]);
	}
}
