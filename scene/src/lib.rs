//! Editing core for chunk-based scene packs: the recursive chunk codec,
//! the object tree with its typed property lists and live reference
//! counts, the four shared geometry pools every mesh addresses into, and
//! ray picking over the world-transformed tree.
//!
//! Archive containers, class metadata files and the renderer itself live
//! outside; they hand bytes in through [`PackSource`] and consume the
//! [`render::RenderBackend`] contract.

pub mod anim;
pub mod chunk;
pub mod class;
pub mod dbl;
pub mod gameobj;
pub mod geo;
pub mod pick;
pub mod render;
pub mod texture;

use std::io;

use chunk::{
	Chunk,
	FormatError
};
use gameobj::Scene;
use geo::GeometryStore;

/// Archive collaborator: supplies the raw bytes of one named entry,
/// handed whole to the chunk codec.
pub trait PackSource {
	fn entry(&mut self, name: &str) -> io::Result<Vec<u8>>;
}

/// Decodes a whole scene pack. Fatal on any malformed chunk; either a
/// complete scene comes back or none at all.
#[cfg(feature = "import")]
pub fn load(bytes: &[u8]) -> Result<(Scene, GeometryStore), FormatError> {
	let root = Chunk::read(bytes)?;
	Scene::read_pack(&root)
}

#[cfg(feature = "import")]
pub fn load_entry<S>(source: &mut S, name: &str) -> Result<(Scene, GeometryStore), FormatError>
where
	S: PackSource,
{
	let bytes = source.entry(name)?;
	load(bytes.as_slice())
}

/// Rebuilds the pack chunk tree wholesale from live state and encodes it
#[cfg(feature = "export")]
pub fn save(scene: &Scene, geo: &GeometryStore) -> Result<Vec<u8>, FormatError> {
	Ok(scene.write_pack(geo)?.to_bytes())
}
