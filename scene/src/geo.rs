use bitflags::bitflags;

use byteorder::{
	LE,
	ReadBytesExt,
	WriteBytesExt
};

use std::io;
use thiserror::Error;

use ultraviolet::vec::Vec3;

/// Bytes per vertex record, three `f32` coordinates
pub const VERTEX_SIZE: u32 = 12;
/// A face buffer entry is the raw vertex index scaled by this
pub const FACE_INDEX_SCALE: u16 = 2;
/// Bytes in a face-material header: two UV-set offsets plus a face count
pub const FTX_HEADER_SIZE: usize = 12;
/// Bytes per face-material record, six `u16` fields
pub const FTX_RECORD_SIZE: usize = 12;
/// `ftxo` values with this bit set carry no face-material data
pub const FTXO_RESERVED_BIT: u32 = 0x8000_0000;

/// Material record stamped on every face of a freshly imported mesh
pub const DEFAULT_FACE_RECORD: [u16; 6] = [0x00A0, 0, 0x0135, 0xFFFF, 0, 0x0CF8];
/// Unit quad written into both UV sets of a freshly imported face
pub const DEFAULT_FACE_UVS: [f32; 8] = [0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0, 0.0];

bitflags! {
	/// Low flag word of a face-material record
	pub struct FaceFlags: u16 {
		const TEXTURED = 0x20;
		const SHADED = 0x80;
	}
}

#[derive(Debug, Error)]
pub enum GeoError {
	#[error("face index {0} is outside the supplied vertex list")]
	FaceIndex(u16),
	#[error("face-material data at ftxo {0:#X} runs outside its pool")]
	FtxRange(u32),
	#[error("quad index list length {0} is not a multiple of 4")]
	QuadList(usize),
	#[error("mesh addresses {0} data outside the stored range")]
	Range(&'static str),
	#[error("triangle index list length {0} is not a multiple of 3")]
	TriangleList(usize),
	#[error("vertex count {0} exceeds the index range of the face buffer")]
	VertexCount(usize),
}

/// Per-object record of offsets and counts into the shared geometry
/// buffers. Vertex offsets count `f32` words, face offsets count `u16`
/// words and `ftxo` is a byte offset plus one, zero meaning none.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Mesh {
	pub vertstart: u32,
	pub quadstart: u32,
	pub tristart: u32,
	pub numverts: u32,
	pub numquads: u32,
	pub numtris: u32,
	pub ftxo: u32,
}

impl Mesh {
	pub fn num_faces(&self) -> u32 {
		self.numquads + self.numtris
	}

	pub fn has_ftx(&self) -> bool {
		self.ftxo != 0 && self.ftxo & FTXO_RESERVED_BIT == 0
	}

	#[cfg(feature = "import")]
	pub fn read<R>(buf: &mut R) -> io::Result<Mesh>
	where
		R: ReadBytesExt,
	{
		Ok(Mesh {
			vertstart: buf.read_u32::<LE>()?,
			quadstart: buf.read_u32::<LE>()?,
			tristart: buf.read_u32::<LE>()?,
			numverts: buf.read_u32::<LE>()?,
			numquads: buf.read_u32::<LE>()?,
			numtris: buf.read_u32::<LE>()?,
			ftxo: buf.read_u32::<LE>()?,
		})
	}

	#[cfg(feature = "export")]
	pub fn write<W>(&self, buf: &mut W) -> io::Result<()>
	where
		W: WriteBytesExt,
	{
		buf.write_u32::<LE>(self.vertstart)?;
		buf.write_u32::<LE>(self.quadstart)?;
		buf.write_u32::<LE>(self.tristart)?;
		buf.write_u32::<LE>(self.numverts)?;
		buf.write_u32::<LE>(self.numquads)?;
		buf.write_u32::<LE>(self.numtris)?;
		buf.write_u32::<LE>(self.ftxo)
	}
}

fn f32_at(buf: &[u8], word: usize) -> f32 {
	let off = word * 4;
	f32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

fn u16_at(buf: &[u8], word: usize) -> u16 {
	let off = word * 2;
	u16::from_le_bytes([buf[off], buf[off + 1]])
}

fn u32_at(buf: &[u8], off: usize) -> u32 {
	u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]])
}

/// The four shared geometry pools every mesh in the scene addresses into.
/// Growth is append-only; existing offsets stay valid because nothing is
/// ever inserted before existing data, and a mutation either commits to
/// all four buffers or to none.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GeometryStore {
	pub vertices: Vec<u8>,
	pub faces: Vec<u8>,
	pub ftx: Vec<u8>,
	pub uvs: Vec<u8>,
}

impl GeometryStore {
	/// World-less position of the vertex a face entry points at.
	/// `entry * 3/2` is the `f32` index relative to `vertstart`.
	pub fn vertex(&self, vertstart: u32, entry: u16) -> Vec3 {
		let base = vertstart as usize + entry as usize * 3 / 2;
		Vec3::new(
			f32_at(self.vertices.as_slice(), base),
			f32_at(self.vertices.as_slice(), base + 1),
			f32_at(self.vertices.as_slice(), base + 2),
		)
	}

	/// Face buffer entry at a `u16` index
	pub fn face_entry(&self, index: u32) -> u16 {
		u16_at(self.faces.as_slice(), index as usize)
	}

	/// UV-set offsets and face count of the header at `ftxo`
	pub fn ftx_header(&self, ftxo: u32) -> Option<(u32, u32, u32)> {
		if ftxo == 0 || ftxo & FTXO_RESERVED_BIT != 0 {
			return None;
		}

		let off = (ftxo - 1) as usize;
		if off + FTX_HEADER_SIZE > self.ftx.len() {
			return None;
		}

		Some((u32_at(self.ftx.as_slice(), off), u32_at(self.ftx.as_slice(), off + 4), u32_at(self.ftx.as_slice(), off + 8)))
	}

	/// Checks that every byte range the descriptor addresses lies inside
	/// the current buffers, face entries included
	pub fn validate_mesh(&self, mesh: &Mesh) -> Result<(), GeoError> {
		let vert_words = (self.vertices.len() / 4) as u64;
		if (mesh.vertstart as u64 + mesh.numverts as u64 * 3) > vert_words {
			return Err(GeoError::Range("vertex"));
		}

		let face_words = (self.faces.len() / 2) as u64;
		if mesh.numtris > 0 && (mesh.tristart as u64 + mesh.numtris as u64 * 3) > face_words {
			return Err(GeoError::Range("triangle"));
		}
		if mesh.numquads > 0 && (mesh.quadstart as u64 + mesh.numquads as u64 * 4) > face_words {
			return Err(GeoError::Range("quad"));
		}

		for i in 0..mesh.numtris * 3 {
			self.validate_entry(mesh, mesh.tristart + i)?;
		}
		for i in 0..mesh.numquads * 4 {
			self.validate_entry(mesh, mesh.quadstart + i)?;
		}

		if mesh.has_ftx() {
			let (uv1, uv2, faces) = match self.ftx_header(mesh.ftxo) {
				Some(header) => header,
				None => return Err(GeoError::FtxRange(mesh.ftxo)),
			};

			let end = (mesh.ftxo - 1) as u64 + FTX_HEADER_SIZE as u64 + faces as u64 * FTX_RECORD_SIZE as u64;
			if end > self.ftx.len() as u64 {
				return Err(GeoError::FtxRange(mesh.ftxo));
			}

			let uv_words = (self.uvs.len() / 4) as u64;
			for set in [uv1, uv2] {
				if set as u64 + faces as u64 * 8 > uv_words {
					return Err(GeoError::Range("UV"));
				}
			}
		}

		Ok(())
	}

	fn validate_entry(&self, mesh: &Mesh, index: u32) -> Result<(), GeoError> {
		let entry = self.face_entry(index);
		let vert_words = (self.vertices.len() / 4) as u64;
		if mesh.vertstart as u64 + entry as u64 * 3 / 2 + 3 > vert_words {
			return Err(GeoError::FaceIndex(entry));
		}

		Ok(())
	}

	/// Appends a freshly loaded mesh to all four pools and returns its
	/// descriptor. The supplied index lists address only `verts`;
	/// triangles land in the face buffer before quads, and every face
	/// gets a default material record and unit-quad UVs in both sets.
	///
	/// Everything is validated up front and the buffers are only touched
	/// once nothing can fail, so a rejected import leaves the store
	/// byte-identical.
	pub fn import_mesh(&mut self, verts: &[Vec3], tri_indices: &[u16], quad_indices: &[u16]) -> Result<Mesh, GeoError> {
		if tri_indices.len() % 3 != 0 {
			return Err(GeoError::TriangleList(tri_indices.len()));
		}
		if quad_indices.len() % 4 != 0 {
			return Err(GeoError::QuadList(quad_indices.len()));
		}
		if verts.len() > (u16::MAX / FACE_INDEX_SCALE) as usize + 1 {
			return Err(GeoError::VertexCount(verts.len()));
		}
		for &i in tri_indices.iter().chain(quad_indices.iter()) {
			if i as usize >= verts.len() {
				return Err(GeoError::FaceIndex(i));
			}
		}

		let numverts = verts.len() as u32;
		let numtris = (tri_indices.len() / 3) as u32;
		let numquads = (quad_indices.len() / 4) as u32;
		let numfaces = numtris + numquads;
		let face_index = (self.faces.len() / 2) as u32;

		let mesh = Mesh {
			vertstart: (self.vertices.len() / 4) as u32,
			quadstart: if numquads > 0 { face_index + 3 * numtris } else { 0 },
			tristart: if numtris > 0 { face_index } else { 0 },
			numverts: numverts,
			numquads: numquads,
			numtris: numtris,
			ftxo: self.ftx.len() as u32 + 1,
		};

		// Grown copies of all four pools; the old ones stay untouched until
		// every append succeeded, then everything swaps in together.
		let mut new_vertices = Vec::with_capacity(self.vertices.len() + numverts as usize * VERTEX_SIZE as usize);
		new_vertices.extend_from_slice(self.vertices.as_slice());
		for v in verts.iter() {
			new_vertices.extend_from_slice(&v.x.to_le_bytes());
			new_vertices.extend_from_slice(&v.y.to_le_bytes());
			new_vertices.extend_from_slice(&v.z.to_le_bytes());
		}

		let mut new_faces = Vec::with_capacity(self.faces.len() + tri_indices.len() * 2 + quad_indices.len() * 2);
		new_faces.extend_from_slice(self.faces.as_slice());
		for &i in tri_indices.iter().chain(quad_indices.iter()) {
			new_faces.extend_from_slice(&(i * FACE_INDEX_SCALE).to_le_bytes());
		}

		let uv1 = (self.uvs.len() / 4) as u32;
		let uv2 = uv1 + numfaces * 8;
		let mut new_ftx = Vec::with_capacity(self.ftx.len() + FTX_HEADER_SIZE + numfaces as usize * FTX_RECORD_SIZE);
		new_ftx.extend_from_slice(self.ftx.as_slice());
		new_ftx.extend_from_slice(&uv1.to_le_bytes());
		new_ftx.extend_from_slice(&uv2.to_le_bytes());
		new_ftx.extend_from_slice(&numfaces.to_le_bytes());
		for _ in 0..numfaces {
			for field in DEFAULT_FACE_RECORD {
				new_ftx.extend_from_slice(&field.to_le_bytes());
			}
		}

		let mut new_uvs = Vec::with_capacity(self.uvs.len() + numfaces as usize * 8 * 4 * 2);
		new_uvs.extend_from_slice(self.uvs.as_slice());
		for _ in 0..2 {
			for _ in 0..numfaces {
				for uv in DEFAULT_FACE_UVS {
					new_uvs.extend_from_slice(&uv.to_le_bytes());
				}
			}
		}

		self.vertices = new_vertices;
		self.faces = new_faces;
		self.ftx = new_ftx;
		self.uvs = new_uvs;

		Ok(mesh)
	}

	/// Rewrites the texture id field of every face-material record of the
	/// mesh, in place. The face count is the one stored in the header, and
	/// no other byte of any pool changes.
	pub fn rebind_texture(&mut self, mesh: &Mesh, tex_id: u16) -> Result<(), GeoError> {
		let (_, _, faces) = match self.ftx_header(mesh.ftxo) {
			Some(header) => header,
			None => return Err(GeoError::FtxRange(mesh.ftxo)),
		};

		let base = (mesh.ftxo - 1) as usize + FTX_HEADER_SIZE;
		let end = base + faces as usize * FTX_RECORD_SIZE;
		if end > self.ftx.len() {
			return Err(GeoError::FtxRange(mesh.ftxo));
		}

		for i in 0..faces as usize {
			let off = base + i * FTX_RECORD_SIZE + 4;
			self.ftx[off..off + 2].copy_from_slice(&tex_id.to_le_bytes());
		}

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn unit_quad() -> [Vec3; 4] {
		[
			Vec3::new(-1.0, -1.0, 10.0),
			Vec3::new(1.0, -1.0, 10.0),
			Vec3::new(1.0, 1.0, 10.0),
			Vec3::new(-1.0, 1.0, 10.0),
		]
	}

	#[test]
	fn test_import_offsets() {
		let mut geo = GeometryStore::default();
		let tri = geo.import_mesh(&unit_quad()[0..3], &[0, 1, 2], &[]).unwrap();
		assert_eq!(tri.vertstart, 0);
		assert_eq!(tri.tristart, 0);
		assert_eq!(tri.quadstart, 0);
		assert_eq!(tri.ftxo, 1);

		let before = geo.clone();
		let quad = geo.import_mesh(&unit_quad(), &[], &[0, 1, 2, 3]).unwrap();

		// New ranges address exactly the appended bytes.
		assert_eq!(quad.vertstart as usize * 4, before.vertices.len());
		assert_eq!(quad.quadstart as usize * 2, before.faces.len());
		assert_eq!(quad.tristart, 0);
		assert_eq!(quad.ftxo as usize, before.ftx.len() + 1);
		assert_eq!(geo.vertices.len(), before.vertices.len() + 4 * VERTEX_SIZE as usize);
		assert_eq!(geo.faces.len(), before.faces.len() + 4 * 2);
		assert_eq!(geo.ftx.len(), before.ftx.len() + FTX_HEADER_SIZE + FTX_RECORD_SIZE);
		assert_eq!(geo.uvs.len(), before.uvs.len() + 2 * 8 * 4);

		// Pre-existing content is bit-for-bit where it was.
		assert_eq!(&geo.vertices[..before.vertices.len()], before.vertices.as_slice());
		assert_eq!(&geo.faces[..before.faces.len()], before.faces.as_slice());
		assert_eq!(&geo.ftx[..before.ftx.len()], before.ftx.as_slice());
		assert_eq!(&geo.uvs[..before.uvs.len()], before.uvs.as_slice());

		assert!(geo.validate_mesh(&tri).is_ok());
		assert!(geo.validate_mesh(&quad).is_ok());
	}

	#[test]
	fn test_import_scales_indices() {
		let mut geo = GeometryStore::default();
		let quad = geo.import_mesh(&unit_quad(), &[], &[0, 1, 2, 3]).unwrap();
		for i in 0..4 {
			assert_eq!(geo.face_entry(quad.quadstart + i), i as u16 * FACE_INDEX_SCALE);
		}

		assert_eq!(geo.vertex(quad.vertstart, geo.face_entry(quad.quadstart + 2)), Vec3::new(1.0, 1.0, 10.0));
	}

	#[test]
	fn test_import_rejects_bad_indices() {
		let mut geo = GeometryStore::default();
		let before = geo.clone();
		assert!(geo.import_mesh(&unit_quad(), &[0, 1, 9], &[]).is_err());
		assert!(geo.import_mesh(&unit_quad(), &[0, 1], &[]).is_err());
		assert_eq!(geo, before);
	}

	#[test]
	fn test_rebind_texture() {
		let mut geo = GeometryStore::default();
		let quad = geo.import_mesh(&unit_quad(), &[], &[0, 1, 2, 3]).unwrap();
		let before = geo.clone();

		geo.rebind_texture(&quad, 0x1234).unwrap();
		assert_eq!(geo.vertices, before.vertices);
		assert_eq!(geo.faces, before.faces);
		assert_eq!(geo.uvs, before.uvs);
		assert_eq!(geo.ftx.len(), before.ftx.len());

		let off = (quad.ftxo - 1) as usize + FTX_HEADER_SIZE;
		for (i, (a, b)) in geo.ftx.iter().zip(before.ftx.iter()).enumerate() {
			if i == off + 4 {
				assert_eq!(*a, 0x34);
			} else if i == off + 5 {
				assert_eq!(*a, 0x12);
			} else {
				assert_eq!(a, b);
			}
		}

		let no_ftx = Mesh { ftxo: 0, ..quad };
		assert!(geo.rebind_texture(&no_ftx, 1).is_err());
	}

	#[test]
	fn test_validate_catches_overruns() {
		let mut geo = GeometryStore::default();
		let quad = geo.import_mesh(&unit_quad(), &[], &[0, 1, 2, 3]).unwrap();

		let bad = Mesh { numverts: 99, ..quad };
		assert!(matches!(geo.validate_mesh(&bad), Err(GeoError::Range("vertex"))));

		let bad = Mesh { ftxo: 4000, ..quad };
		assert!(matches!(geo.validate_mesh(&bad), Err(GeoError::FtxRange(_))));

		let reserved = Mesh { ftxo: quad.ftxo | FTXO_RESERVED_BIT, ..quad };
		assert!(geo.validate_mesh(&reserved).is_ok());
	}
}
