use byteorder::{
	LE,
	ReadBytesExt
};

use ultraviolet::vec::Vec3;

use spk_core::io_ext::ReadBinExt;

use crate::chunk::{
	Chunk,
	FormatError,
	TAG_HEAD,
	TAG_KEYS
};
use crate::gameobj::{
	ObjId,
	Scene
};

/// One position key of an object's embedded animation
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AnimKey {
	pub time: u32,
	pub position: Vec3,
}

/// Decodes the key list of the `HEAD` chunk embedded at `excoff - 1` in
/// the animation pool. The `KEYS` payload is count-prefixed: its first
/// block holds the key count, then one 16-byte block per key. An `excoff`
/// of zero means no animation.
#[cfg(feature = "import")]
pub fn read_keys(pool: &[u8], excoff: u32) -> Result<Vec<AnimKey>, FormatError> {
	if excoff == 0 {
		return Ok(vec![]);
	}

	let off = (excoff - 1) as usize;
	if off > pool.len() {
		return Err(FormatError::Truncated { need: off, have: pool.len() });
	}

	let (head, _) = Chunk::read_prefix(&pool[off..])?;
	if head.tag != TAG_HEAD {
		return Err(FormatError::Tag { expected: TAG_HEAD, found: head.tag });
	}

	let keys = head.find_subchunk(TAG_KEYS).ok_or(FormatError::Missing(TAG_KEYS))?;
	let blocks = keys.blocks().ok_or(FormatError::Missing(TAG_KEYS))?;

	let mut first = blocks.first().ok_or(FormatError::BlockCount { tag: TAG_KEYS })?.as_slice();
	let count = first.read_u32::<LE>()? as usize;
	if blocks.len() < count + 1 {
		return Err(FormatError::BlockCount { tag: TAG_KEYS });
	}

	let mut out = vec![];
	for block in blocks[1..count + 1].iter() {
		let mut buf = block.as_slice();
		out.push(AnimKey {
			time: buf.read_u32::<LE>()?,
			position: buf.read_vec3_le()?,
		});
	}

	Ok(out)
}

/// Key list of one object, empty when it carries no animation
#[cfg(feature = "import")]
pub fn object_keys(scene: &Scene, obj: ObjId) -> Result<Vec<AnimKey>, FormatError> {
	let excoff = match scene.get(obj) {
		Some(o) => o.excoff,
		None => 0,
	};

	match &scene.anim_pool {
		Some(pool) => read_keys(pool.as_slice(), excoff),
		None => Ok(vec![]),
	}
}

#[cfg(test)]
mod tests {
	use crate::chunk::Payload;

	use super::*;

	#[cfg(feature = "export")]
	fn sample_pool(keys: &[(u32, Vec3)]) -> Vec<u8> {
		let mut blocks = vec![(keys.len() as u32).to_le_bytes().to_vec()];
		for (time, pos) in keys.iter() {
			let mut block = vec![];
			block.extend_from_slice(&time.to_le_bytes());
			block.extend_from_slice(&pos.x.to_le_bytes());
			block.extend_from_slice(&pos.y.to_le_bytes());
			block.extend_from_slice(&pos.z.to_le_bytes());
			blocks.push(block);
		}

		let head = Chunk {
			tag: TAG_HEAD,
			payload: Payload::Children(vec![Chunk { tag: TAG_KEYS, payload: Payload::Blocks(blocks) }]),
		};

		// Pool data ahead of the chunk, as in a real pack.
		let mut pool = vec![0xEE; 7];
		pool.extend_from_slice(head.to_bytes().as_slice());
		pool
	}

	#[cfg(all(feature = "import", feature = "export"))]
	#[test]
	fn test_read_keys() {
		let wanted = [(0, Vec3::new(1.0, 2.0, 3.0)), (40, Vec3::new(4.0, 5.0, 6.0))];
		let pool = sample_pool(&wanted);

		let keys = read_keys(pool.as_slice(), 8).unwrap();
		assert_eq!(keys.len(), 2);
		assert_eq!(keys[0], AnimKey { time: 0, position: Vec3::new(1.0, 2.0, 3.0) });
		assert_eq!(keys[1], AnimKey { time: 40, position: Vec3::new(4.0, 5.0, 6.0) });
	}

	#[cfg(feature = "import")]
	#[test]
	fn test_no_animation() {
		assert!(read_keys(&[], 0).unwrap().is_empty());
	}

	#[cfg(all(feature = "import", feature = "export"))]
	#[test]
	fn test_dangling_offset() {
		let pool = sample_pool(&[(0, Vec3::zero())]);
		assert!(read_keys(pool.as_slice(), pool.len() as u32 + 50).is_err());
		assert!(read_keys(pool.as_slice(), 2).is_err());
	}
}
