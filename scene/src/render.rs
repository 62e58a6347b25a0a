use crate::geo::{
	GeometryStore,
	Mesh
};

/// Contract of the drawing collaborator, consumed by the editor loop and
/// implemented outside the core.
///
/// The caller keeps a strict per-frame order: mutate, then invalidate,
/// then draw. [`RenderBackend::invalidate_mesh`] has to run after any
/// mutation touching a mesh and before that mesh's next
/// [`RenderBackend::draw_mesh`]; [`RenderBackend::invalidate_texture`] is
/// the same contract for texture caches after a rebind.
pub trait RenderBackend {
	/// Submits the mesh using the current geometry store content
	fn draw_mesh(&mut self, geo: &GeometryStore, mesh: &Mesh);
	fn invalidate_mesh(&mut self, mesh: &Mesh);
	fn invalidate_texture(&mut self, id: u32);
}

#[cfg(test)]
mod tests {
	use ultraviolet::vec::Vec3;

	use super::*;

	#[derive(Default)]
	struct RecordingBackend {
		calls: Vec<String>,
	}

	impl RenderBackend for RecordingBackend {
		fn draw_mesh(&mut self, _geo: &GeometryStore, mesh: &Mesh) {
			self.calls.push(format!("draw {}", mesh.ftxo));
		}

		fn invalidate_mesh(&mut self, mesh: &Mesh) {
			self.calls.push(format!("invalidate {}", mesh.ftxo));
		}

		fn invalidate_texture(&mut self, id: u32) {
			self.calls.push(format!("invalidate tex {}", id));
		}
	}

	#[test]
	fn test_frame_order() {
		let mut geo = GeometryStore::default();
		let mut backend = RecordingBackend::default();

		let verts = [Vec3::zero(), Vec3::new(1.0, 0.0, 0.0), Vec3::new(0.0, 1.0, 0.0)];
		let mesh = geo.import_mesh(&verts, &[0, 1, 2], &[]).unwrap();
		backend.invalidate_mesh(&mesh);
		backend.draw_mesh(&geo, &mesh);

		geo.rebind_texture(&mesh, 5).unwrap();
		backend.invalidate_mesh(&mesh);
		backend.invalidate_texture(5);
		backend.draw_mesh(&geo, &mesh);

		assert_eq!(backend.calls, vec![
			"invalidate 1",
			"draw 1",
			"invalidate 1",
			"invalidate tex 5",
			"draw 1",
		]);
	}
}
