use ultraviolet::{
	mat::Mat4,
	vec::{
		Vec3,
		Vec4
	}
};

use crate::gameobj::{
	GameObject,
	ObjId,
	Scene
};
use crate::geo::GeometryStore;

/// World-space picking ray
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ray {
	pub start: Vec3,
	pub dir: Vec3,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PickHit {
	pub obj: ObjId,
	pub point: Vec3,
}

struct Best {
	dist: f32,
	hit: Option<PickHit>,
}

/// Local transform as the renderer composes it: rotation first, then the
/// translation in the fourth column
fn local_matrix(obj: &GameObject) -> Mat4 {
	let m = &obj.matrix;
	Mat4::new(
		Vec4::new(m.cols[0].x, m.cols[0].y, m.cols[0].z, 0.0),
		Vec4::new(m.cols[1].x, m.cols[1].y, m.cols[1].z, 0.0),
		Vec4::new(m.cols[2].x, m.cols[2].y, m.cols[2].z, 0.0),
		Vec4::new(obj.position.x, obj.position.y, obj.position.z, 1.0),
	)
}

fn transform(m: &Mat4, v: Vec3) -> Vec3 {
	let h = *m * Vec4::new(v.x, v.y, v.z, 1.0);
	Vec3::new(h.x, h.y, h.z)
}

/// Squared distance in the horizontal plane, the vertical axis left out
fn sqdist_xz(v: Vec3) -> f32 {
	v.x * v.x + v.z * v.z
}

/// Ray-vs-face test for a triangle or quad starting at `startface` in the
/// face buffer. Back faces and negative ray parameters miss; for the rest
/// the plane intersection point has to pass the interior test against
/// every edge, the closing one included. Returns the world-space hit.
fn face_hit(geo: &GeometryStore, ray: &Ray, vertstart: u32, startface: u32, numverts: usize, world: &Mat4) -> Option<Vec3> {
	let mut pnts = [Vec3::zero(); 4];
	for (i, p) in pnts.iter_mut().enumerate().take(3) {
		*p = transform(world, geo.vertex(vertstart, geo.face_entry(startface + i as u32)));
	}

	let mut edges = [Vec3::zero(); 4];
	edges[0] = pnts[1] - pnts[0];
	edges[1] = pnts[2] - pnts[1];

	let planenorm = edges[1].cross(edges[0]);
	let planeord = -planenorm.dot(pnts[0]);

	let planenorm_dot_raydir = planenorm.dot(ray.dir);
	if planenorm_dot_raydir >= 0.0 {
		return None;
	}

	let param = -(planenorm.dot(ray.start) + planeord) / planenorm_dot_raydir;
	if param < 0.0 {
		return None;
	}

	let interpnt = ray.start + ray.dir * param;

	for i in 3..numverts {
		pnts[i] = transform(world, geo.vertex(vertstart, geo.face_entry(startface + i as u32)));
	}

	for i in 2..numverts - 1 {
		edges[i] = pnts[i + 1] - pnts[i];
	}
	edges[numverts - 1] = pnts[0] - pnts[numverts - 1];

	for i in 0..numverts {
		let edgenorm = -planenorm.cross(edges[i]);
		if edgenorm.dot(interpnt - pnts[i]) < 0.0 {
			return None;
		}
	}

	Some(interpnt)
}

fn pick_object(scene: &Scene, geo: &GeometryStore, ray: &Ray, campos: Vec3, id: ObjId, world: &Mat4, best: &mut Best) {
	let obj = match scene.get(id) {
		Some(o) => o,
		None => return,
	};

	let mtx = *world * local_matrix(obj);

	if let Some(mesh) = &obj.mesh {
		for i in 0..mesh.numquads {
			if let Some(p) = face_hit(geo, ray, mesh.vertstart, mesh.quadstart + i * 4, 4, &mtx) {
				let d = sqdist_xz(p - campos);
				if d < best.dist {
					best.dist = d;
					best.hit = Some(PickHit { obj: id, point: p });
				}
			}
		}
		for i in 0..mesh.numtris {
			if let Some(p) = face_hit(geo, ray, mesh.vertstart, mesh.tristart + i * 3, 3, &mtx) {
				let d = sqdist_xz(p - campos);
				if d < best.dist {
					best.dist = d;
					best.hit = Some(PickHit { obj: id, point: p });
				}
			}
		}
	}

	for &c in obj.children.iter() {
		pick_object(scene, geo, ray, campos, c, &mtx, best);
	}
}

/// Resolves the ray against every face of every mesh in the subtree under
/// `root`, keeping the hit with the smallest squared horizontal distance
/// to `campos`. Ties stay with the first hit in traversal order.
pub fn pick(scene: &Scene, geo: &GeometryStore, ray: &Ray, campos: Vec3, root: ObjId) -> Option<PickHit> {
	let mut best = Best {
		dist: f32::INFINITY,
		hit: None,
	};

	pick_object(scene, geo, ray, campos, root, &Mat4::identity(), &mut best);
	best.hit
}
