use bitflags::bitflags;

use byteorder::{
	LE,
	ReadBytesExt,
	WriteBytesExt
};

#[cfg(feature = "import")]
use log::warn;

use std::collections::HashMap;
use std::io;
use thiserror::Error;

use ultraviolet::{
	mat::Mat3,
	vec::Vec3
};

use spk_core::io_ext::{
	ReadBinExt,
	WriteBinExt
};

use crate::chunk::{
	Chunk,
	FormatError,
	Payload,
	TAG_PACK,
	TAG_PALC,
	TAG_PDBL,
	TAG_PEXC,
	TAG_PFAC,
	TAG_PFTX,
	TAG_POBJ,
	TAG_PUVC,
	TAG_PVER
};
use crate::dbl::{
	DblList,
	GORef
};
use crate::geo::{
	GeometryStore,
	Mesh
};

/// Arena slot of a [`GameObject`]
pub type ObjId = usize;

/// Parent index written for objects sitting directly under the super-root
pub const NO_PARENT: u32 = 0xFFFF_FFFF;

const COMPONENT_MESH: u32 = 1;
const COMPONENT_LIGHT: u32 = 2;

bitflags! {
	pub struct ObjFlags: u32 {
		/// The object's mesh takes part in rendering
		const MESH_VISIBLE = 0x20;
	}
}

/// Rejected mutation. The scene is untouched whenever one of these comes
/// back.
#[derive(Debug, Error)]
pub enum EditError {
	#[error("cannot move \"{0}\" under its own subtree")]
	CyclicReparent(String),
	#[error("\"{name}\" is referenced {count} time(s) and cannot be removed")]
	Referenced { name: String, count: u32 },
	#[error("the scene root cannot be moved or removed")]
	Root,
	#[error("object has no reference slot {0}")]
	Slot(usize),
	#[error("stale object id {0}")]
	Stale(ObjId),
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Light {
	pub params: [u32; 7],
}

impl Light {
	#[cfg(feature = "import")]
	fn read<R>(buf: &mut R) -> io::Result<Light>
	where
		R: ReadBytesExt,
	{
		let mut params = [0; 7];
		for p in params.iter_mut() {
			*p = buf.read_u32::<LE>()?;
		}

		Ok(Light { params: params })
	}

	#[cfg(feature = "export")]
	fn write<W>(&self, buf: &mut W) -> io::Result<()>
	where
		W: WriteBytesExt,
	{
		for p in self.params.iter() {
			buf.write_u32::<LE>(*p)?;
		}

		Ok(())
	}
}

/// One node of the scene tree. The local transform is the 3x3 rotation
/// applied before the translation; mesh and light descriptors are optional
/// components; `refcount` is the number of live reference slots anywhere
/// in the tree that resolve to this object.
#[derive(Clone, Debug, PartialEq)]
pub struct GameObject {
	pub type_code: u32,
	pub name: String,
	pub state: u32,
	pub flags: u32,
	pub matrix: Mat3,
	pub position: Vec3,
	pub color: u32,
	pub excoff: u32,
	pub dbl: Option<DblList>,
	pub mesh: Option<Mesh>,
	pub light: Option<Light>,
	pub parent: Option<ObjId>,
	pub children: Vec<ObjId>,
	pub refcount: u32,
}

impl GameObject {
	pub fn new(type_code: u32, name: &str) -> GameObject {
		GameObject {
			type_code: type_code,
			name: name.to_string(),
			state: 0,
			flags: 0,
			matrix: Mat3::identity(),
			position: Vec3::zero(),
			color: 0,
			excoff: 0,
			dbl: None,
			mesh: None,
			light: None,
			parent: None,
			children: vec![],
			refcount: 0,
		}
	}

	/// Decodes one object record chunk. Returns the object and the parent
	/// index embedded in the record; the property blob is pulled out of
	/// the shared pool right away.
	#[cfg(feature = "import")]
	fn read(tag: u32, payload: &[u8], dbl_pool: &[u8]) -> Result<(GameObject, u32), FormatError> {
		let mut buf = payload;

		let name = buf.read_cstr()?;
		let state = buf.read_u32::<LE>()?;
		let flags = buf.read_u32::<LE>()?;
		let parent = buf.read_u32::<LE>()?;
		let matrix = buf.read_mat3_le()?;
		let position = buf.read_vec3_le()?;
		let color = buf.read_u32::<LE>()?;
		let dbloff = buf.read_u32::<LE>()?;
		let excoff = buf.read_u32::<LE>()?;
		let components = buf.read_u32::<LE>()?;

		let mesh = if components & COMPONENT_MESH != 0 {
			Some(Mesh::read(&mut buf)?)
		} else {
			None
		};
		let light = if components & COMPONENT_LIGHT != 0 {
			Some(Light::read(&mut buf)?)
		} else {
			None
		};

		if !buf.is_empty() {
			return Err(FormatError::Trailing(tag));
		}

		let dbl = if dbloff != 0 {
			Some(DblList::read(dbl_pool, (dbloff - 1) as usize)?)
		} else {
			None
		};

		let obj = GameObject {
			type_code: tag,
			name: name,
			state: state,
			flags: flags,
			matrix: matrix,
			position: position,
			color: color,
			excoff: excoff,
			dbl: dbl,
			mesh: mesh,
			light: light,
			parent: None,
			children: vec![],
			refcount: 0,
		};

		Ok((obj, parent))
	}

	/// Encodes the record chunk; the property blob goes to the shared pool
	/// and the record stores its offset.
	#[cfg(feature = "export")]
	fn write(&self, parent: u32, dbl_pool: &mut Vec<u8>, order: &HashMap<ObjId, u32>) -> io::Result<Chunk> {
		let dbloff = match &self.dbl {
			Some(list) => {
				let off = dbl_pool.len() as u32 + 1;
				list.write(dbl_pool, order)?;
				off
			},
			None => 0,
		};

		let mut rec = vec![];
		rec.write_cstr(self.name.as_str())?;
		rec.write_u32::<LE>(self.state)?;
		rec.write_u32::<LE>(self.flags)?;
		rec.write_u32::<LE>(parent)?;
		rec.write_mat3_le(&self.matrix)?;
		rec.write_vec3_le(&self.position)?;
		rec.write_u32::<LE>(self.color)?;
		rec.write_u32::<LE>(dbloff)?;
		rec.write_u32::<LE>(self.excoff)?;

		let mut components = 0;
		if self.mesh.is_some() {
			components |= COMPONENT_MESH;
		}
		if self.light.is_some() {
			components |= COMPONENT_LIGHT;
		}
		rec.write_u32::<LE>(components)?;

		if let Some(mesh) = &self.mesh {
			mesh.write(&mut rec)?;
		}
		if let Some(light) = &self.light {
			light.write(&mut rec)?;
		}

		Ok(Chunk { tag: self.type_code, payload: Payload::Raw(rec) })
	}
}

/// The object tree: a growable arena under one synthetic super-root.
/// Children are owned id lists, the parent is a non-owning back-id, so
/// `scene.get(child).parent == Some(p)` exactly when `p`'s child list
/// contains `child`.
#[derive(Clone, Debug)]
pub struct Scene {
	objects: Vec<Option<GameObject>>,
	pub superroot: ObjId,
	/// Raw `PEXC` payload, addressed by object `excoff` fields
	pub anim_pool: Option<Vec<u8>>,
	/// Retained `PALC` texture container
	pub textures: Option<Chunk>,
}

impl Default for Scene {
	fn default() -> Scene {
		Scene::new()
	}
}

impl Scene {
	pub fn new() -> Scene {
		Scene {
			objects: vec![Some(GameObject::new(0, "SuperRoot"))],
			superroot: 0,
			anim_pool: None,
			textures: None,
		}
	}

	pub fn get(&self, id: ObjId) -> Option<&GameObject> {
		self.objects.get(id).and_then(|slot| slot.as_ref())
	}

	pub fn get_mut(&mut self, id: ObjId) -> Option<&mut GameObject> {
		self.objects.get_mut(id).and_then(|slot| slot.as_mut())
	}

	/// Live objects in arena order, the super-root included
	pub fn iter(&self) -> impl Iterator<Item = (ObjId, &GameObject)> {
		self.objects.iter().enumerate().filter_map(|(id, slot)| Some((id, slot.as_ref()?)))
	}

	fn alloc(&mut self, obj: GameObject) -> ObjId {
		self.objects.push(Some(obj));
		self.objects.len() - 1
	}

	/// Adds a new object as the last child of `parent` and returns its id.
	/// Resolved reference slots the object carries are counted; dead ones
	/// degrade to invalid.
	pub fn spawn(&mut self, mut obj: GameObject, parent: ObjId) -> Result<ObjId, EditError> {
		if self.get(parent).is_none() {
			return Err(EditError::Stale(parent));
		}

		obj.parent = Some(parent);
		obj.children.clear();
		obj.refcount = 0;

		let mut targets = vec![];
		if let Some(dbl) = obj.dbl.as_mut() {
			for r in dbl.refs_mut() {
				if let GORef::Resolved(t) = *r {
					if self.get(t).is_some() {
						targets.push(t);
					} else {
						*r = GORef::Invalid;
					}
				}
			}
		}

		let id = self.alloc(obj);
		for t in targets {
			self.bump(t, 1);
		}

		if let Some(po) = self.get_mut(parent) {
			po.children.push(id);
		}

		Ok(id)
	}

	/// Whether `ancestor` sits somewhere on `id`'s parent chain
	pub fn is_ancestor(&self, ancestor: ObjId, id: ObjId) -> bool {
		let mut cur = self.get(id).and_then(|o| o.parent);
		while let Some(p) = cur {
			if p == ancestor {
				return true;
			}

			cur = self.get(p).and_then(|o| o.parent);
		}

		false
	}

	/// Depth-first name lookup, the starting object included
	pub fn find_by_name(&self, name: &str, from: ObjId) -> Option<ObjId> {
		let obj = self.get(from)?;
		if obj.name == name {
			return Some(from);
		}

		obj.children.iter().find_map(|&c| self.find_by_name(name, c))
	}

	fn collect_subtree(&self, id: ObjId, out: &mut Vec<ObjId>) {
		out.push(id);
		if let Some(obj) = self.get(id) {
			for &c in obj.children.iter() {
				self.collect_subtree(c, out);
			}
		}
	}

	fn bump(&mut self, id: ObjId, delta: i64) {
		if let Some(obj) = self.get_mut(id) {
			obj.refcount = (obj.refcount as i64 + delta) as u32;
		}
	}

	/// Deep-copies the subtree under a new parent and returns the copy's
	/// root. Property lists and mesh/light descriptors are cloned; the
	/// geometry is not, both descriptors keep addressing the same store
	/// slices. Copied reference slots keep their original targets, whose
	/// counts grow accordingly.
	pub fn duplicate(&mut self, obj: ObjId, new_parent: ObjId) -> Result<ObjId, EditError> {
		if obj == self.superroot {
			return Err(EditError::Root);
		}
		if self.get(obj).is_none() {
			return Err(EditError::Stale(obj));
		}
		if self.get(new_parent).is_none() {
			return Err(EditError::Stale(new_parent));
		}

		let copy = self.clone_subtree(obj, new_parent).ok_or(EditError::Stale(obj))?;
		if let Some(parent) = self.get_mut(new_parent) {
			parent.children.push(copy);
		}

		Ok(copy)
	}

	fn clone_subtree(&mut self, src: ObjId, parent: ObjId) -> Option<ObjId> {
		let mut copy = self.get(src)?.clone();

		let src_children = std::mem::take(&mut copy.children);
		copy.parent = Some(parent);
		copy.refcount = 0;

		let mut targets = vec![];
		if let Some(dbl) = copy.dbl.as_mut() {
			for r in dbl.refs_mut() {
				if let GORef::Resolved(t) = *r {
					if self.get(t).is_some() {
						targets.push(t);
					} else {
						*r = GORef::Invalid;
					}
				}
			}
		}

		let id = self.alloc(copy);
		for t in targets {
			self.bump(t, 1);
		}

		for c in src_children {
			if let Some(child) = self.clone_subtree(c, id) {
				if let Some(obj) = self.get_mut(id) {
					obj.children.push(child);
				}
			}
		}

		Some(id)
	}

	/// Moves the object to the end of `new_parent`'s child list. Moving
	/// the super-root, or moving an object underneath itself or one of
	/// its own descendants, is refused with the scene unchanged.
	pub fn give(&mut self, obj: ObjId, new_parent: ObjId) -> Result<(), EditError> {
		if obj == self.superroot {
			return Err(EditError::Root);
		}

		let name = match self.get(obj) {
			Some(o) => o.name.clone(),
			None => return Err(EditError::Stale(obj)),
		};
		if self.get(new_parent).is_none() {
			return Err(EditError::Stale(new_parent));
		}
		if new_parent == obj || self.is_ancestor(obj, new_parent) {
			return Err(EditError::CyclicReparent(name));
		}

		let old_parent = self.get(obj).and_then(|o| o.parent);
		if let Some(p) = old_parent {
			if let Some(parent) = self.get_mut(p) {
				parent.children.retain(|&c| c != obj);
			}
		}

		if let Some(parent) = self.get_mut(new_parent) {
			parent.children.push(obj);
		}
		if let Some(o) = self.get_mut(obj) {
			o.parent = Some(new_parent);
		}

		Ok(())
	}

	/// Discards the subtree rooted at the object. Refused while anything
	/// still references the object itself; references held *by* the
	/// discarded subtree are released first, so outside targets keep
	/// accurate counts.
	pub fn remove(&mut self, obj: ObjId) -> Result<(), EditError> {
		if obj == self.superroot {
			return Err(EditError::Root);
		}

		let (name, refcount, parent) = match self.get(obj) {
			Some(o) => (o.name.clone(), o.refcount, o.parent),
			None => return Err(EditError::Stale(obj)),
		};
		if refcount > 0 {
			return Err(EditError::Referenced { name: name, count: refcount });
		}

		let mut subtree = vec![];
		self.collect_subtree(obj, &mut subtree);

		let mut released = vec![];
		for &id in subtree.iter() {
			if let Some(dbl) = self.get(id).and_then(|o| o.dbl.as_ref()) {
				released.extend(dbl.refs().filter_map(GORef::get));
			}
		}
		for t in released {
			self.bump(t, -1);
		}

		if let Some(p) = parent {
			if let Some(po) = self.get_mut(p) {
				po.children.retain(|&c| c != obj);
			}
		}

		for id in subtree {
			self.objects[id] = None;
		}

		Ok(())
	}

	/// Hands a freshly imported mesh descriptor to the object and marks it
	/// renderable
	pub fn attach_mesh(&mut self, obj: ObjId, mesh: Mesh) -> Result<(), EditError> {
		let o = self.get_mut(obj).ok_or(EditError::Stale(obj))?;
		o.mesh = Some(mesh);
		o.flags |= ObjFlags::MESH_VISIBLE.bits();

		Ok(())
	}

	/// Points the `slot`th reference slot of `obj`'s property list (single
	/// references and list entries counted together, in record order) at
	/// `target`, keeping both counts straight. `None` clears the slot to
	/// invalid.
	pub fn set_ref(&mut self, obj: ObjId, slot: usize, target: Option<ObjId>) -> Result<(), EditError> {
		if let Some(t) = target {
			if self.get(t).is_none() {
				return Err(EditError::Stale(t));
			}
		}

		let old = {
			let o = self.get_mut(obj).ok_or(EditError::Stale(obj))?;
			let dbl = o.dbl.as_mut().ok_or(EditError::Slot(slot))?;
			let r = dbl.refs_mut().nth(slot).ok_or(EditError::Slot(slot))?;
			let old = r.get();
			*r = match target {
				Some(t) => GORef::Resolved(t),
				None => GORef::Invalid,
			};
			old
		};

		if let Some(t) = old {
			self.bump(t, -1);
		}
		if let Some(t) = target {
			self.bump(t, 1);
		}

		Ok(())
	}

	/// Second resolution pass: every unresolved table index becomes a live
	/// handle and bumps its target, or degrades to invalid with a warning.
	#[cfg(feature = "import")]
	fn resolve_refs(&mut self, table: &[ObjId]) {
		let ids: Vec<ObjId> = self.iter().map(|(id, _)| id).collect();
		let mut bumps = vec![];

		for id in ids {
			let name = match self.get(id) {
				Some(o) => o.name.clone(),
				None => continue,
			};
			if let Some(dbl) = self.get_mut(id).and_then(|o| o.dbl.as_mut()) {
				for r in dbl.refs_mut() {
					if let GORef::Unresolved(index) = *r {
						match table.get(index as usize) {
							Some(&target) => {
								*r = GORef::Resolved(target);
								bumps.push(target);
							},
							None => {
								warn!("\"{}\": object reference {} resolves to nothing", name, index);
								*r = GORef::Invalid;
							},
						}
					}
				}
			}
		}

		for t in bumps {
			self.bump(t, 1);
		}
	}

	/// Builds the scene and the geometry store out of a decoded pack
	/// chunk. Fatal on any structural problem; the caller never sees a
	/// half-built scene.
	#[cfg(feature = "import")]
	pub fn read_pack(root: &Chunk) -> Result<(Scene, GeometryStore), FormatError> {
		if root.tag != TAG_PACK {
			return Err(FormatError::Tag { expected: TAG_PACK, found: root.tag });
		}

		let raw = |tag: u32| -> Result<Vec<u8>, FormatError> {
			let chunk = root.find_subchunk(tag).ok_or(FormatError::Missing(tag))?;
			Ok(chunk.raw().ok_or(FormatError::Missing(tag))?.to_vec())
		};

		let geo = GeometryStore {
			vertices: raw(TAG_PVER)?,
			faces: raw(TAG_PFAC)?,
			ftx: raw(TAG_PFTX)?,
			uvs: raw(TAG_PUVC)?,
		};
		let dbl_pool = raw(TAG_PDBL)?;

		let mut scene = Scene::new();
		scene.anim_pool = match root.find_subchunk(TAG_PEXC) {
			Some(chunk) => Some(chunk.raw().ok_or(FormatError::Missing(TAG_PEXC))?.to_vec()),
			None => None,
		};
		scene.textures = root.find_subchunk(TAG_PALC).cloned();

		let pobj = root.find_subchunk(TAG_POBJ).ok_or(FormatError::Missing(TAG_POBJ))?;
		let records = pobj.children().ok_or(FormatError::Missing(TAG_POBJ))?;

		let mut table: Vec<ObjId> = vec![];
		for record in records.iter() {
			let payload = record.raw().ok_or(FormatError::Record(record.tag))?;
			let (mut obj, parent_index) = GameObject::read(record.tag, payload, dbl_pool.as_slice())?;

			let parent = if parent_index == NO_PARENT {
				scene.superroot
			} else {
				match table.get(parent_index as usize) {
					Some(&id) => id,
					None => return Err(FormatError::Parent(parent_index)),
				}
			};

			obj.parent = Some(parent);
			let id = scene.alloc(obj);
			if let Some(po) = scene.get_mut(parent) {
				po.children.push(id);
			}

			table.push(id);
		}

		for (_, obj) in scene.iter() {
			if let Some(mesh) = &obj.mesh {
				geo.validate_mesh(mesh)?;
			}
		}

		scene.resolve_refs(table.as_slice());

		Ok((scene, geo))
	}

	/// Rebuilds the whole pack chunk from live state. Records go out in
	/// pre-order, the property pool is repacked, reference slots are
	/// written as save-order indices.
	#[cfg(feature = "export")]
	pub fn write_pack(&self, geo: &GeometryStore) -> Result<Chunk, FormatError> {
		let mut order = vec![];
		self.save_order(self.superroot, &mut order);

		let index: HashMap<ObjId, u32> = order.iter().enumerate().map(|(i, &id)| (id, i as u32)).collect();

		let mut dbl_pool = vec![];
		let mut records = vec![];
		for &id in order.iter() {
			let obj = match self.get(id) {
				Some(o) => o,
				None => continue,
			};

			let parent = match obj.parent {
				Some(p) if p != self.superroot => match index.get(&p) {
					Some(&i) => i,
					None => NO_PARENT,
				},
				_ => NO_PARENT,
			};

			records.push(obj.write(parent, &mut dbl_pool, &index)?);
		}

		let mut subs = vec![
			Chunk { tag: TAG_PVER, payload: Payload::Raw(geo.vertices.clone()) },
			Chunk { tag: TAG_PFAC, payload: Payload::Raw(geo.faces.clone()) },
			Chunk { tag: TAG_PFTX, payload: Payload::Raw(geo.ftx.clone()) },
			Chunk { tag: TAG_PUVC, payload: Payload::Raw(geo.uvs.clone()) },
			Chunk { tag: TAG_PDBL, payload: Payload::Raw(dbl_pool) },
		];
		if let Some(pool) = &self.anim_pool {
			subs.push(Chunk { tag: TAG_PEXC, payload: Payload::Raw(pool.clone()) });
		}
		subs.push(Chunk { tag: TAG_POBJ, payload: Payload::Children(records) });
		if let Some(textures) = &self.textures {
			subs.push(textures.clone());
		}

		Ok(Chunk { tag: TAG_PACK, payload: Payload::Children(subs) })
	}

	fn save_order(&self, id: ObjId, out: &mut Vec<ObjId>) {
		if let Some(obj) = self.get(id) {
			if id != self.superroot {
				out.push(id);
			}
			for &c in obj.children.iter() {
				self.save_order(c, out);
			}
		}
	}
}
