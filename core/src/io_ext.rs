use std::io::{
	Read,
	Result,
	Write
};

use ultraviolet::{
	mat::Mat3,
	vec::Vec3
};

pub trait ReadBinExt: Read {
	/// Reads a null-terminated string
	#[inline]
	fn read_cstr(&mut self) -> Result<String> {
		let mut s = String::new();
		let mut buf = [1; 1];

		while buf[0] != 0 {
			self.read_exact(&mut buf)?;
			if buf[0] != 0 {
				s.push(buf[0] as char);
			}
		}

		Ok(s)
	}

	/// Reads a little endian 3D vector
	#[inline]
	fn read_vec3_le(&mut self) -> Result<Vec3> {
		let mut x = [0; 4];
		let mut y = x;
		let mut z = y;

		self.read_exact(&mut x)?;
		self.read_exact(&mut y)?;
		self.read_exact(&mut z)?;

		Ok(Vec3::new(f32::from_le_bytes(x), f32::from_le_bytes(y), f32::from_le_bytes(z)))
	}

	/// Reads a little endian 3x3 matrix, stored as three consecutive columns
	#[inline]
	fn read_mat3_le(&mut self) -> Result<Mat3> {
		let xs = self.read_vec3_le()?;
		let ys = self.read_vec3_le()?;
		let zs = self.read_vec3_le()?;

		Ok(Mat3::new(xs, ys, zs))
	}
}

impl<R> ReadBinExt for R
where
	R: Read + ?Sized,
{
}

pub trait WriteBinExt: Write {
	/// Writes a null-terminated string
	#[inline]
	fn write_cstr(&mut self, s: &str) -> Result<()> {
		for c in s.chars() {
			self.write_all(&[c as u8])?;
		}

		self.write_all(&[0])
	}

	/// Writes a little endian 3D vector
	#[inline]
	fn write_vec3_le(&mut self, v: &Vec3) -> Result<()> {
		self.write_all(&v.x.to_le_bytes())?;
		self.write_all(&v.y.to_le_bytes())?;
		self.write_all(&v.z.to_le_bytes())
	}

	/// Writes a little endian 3x3 matrix as three consecutive columns
	#[inline]
	fn write_mat3_le(&mut self, m: &Mat3) -> Result<()> {
		self.write_vec3_le(&m.cols[0])?;
		self.write_vec3_le(&m.cols[1])?;
		self.write_vec3_le(&m.cols[2])
	}
}

impl<W> WriteBinExt for W
where
	W: Write + ?Sized,
{
}

#[cfg(test)]
mod tests {
	use ultraviolet::{
		mat::Mat3,
		vec::Vec3
	};

	use super::*;

	#[test]
	fn test_read_cstr() {
		let mut data = &b"test\x00123454321"[..];
		assert_eq!("test".to_string(), data.read_cstr().unwrap());
	}

	#[test]
	fn test_write_cstr() {
		let mut data = vec![];
		data.write_cstr("test").unwrap();
		assert_eq!(&b"test\x00"[..], data.as_slice());
	}

	#[test]
	fn test_vec3_round_trip() {
		let v = Vec3::new(0.0155714415, 0.117667466, 0.089328438);
		let mut data = vec![];
		data.write_vec3_le(&v).unwrap();
		assert_eq!(v, data.as_slice().read_vec3_le().unwrap());
	}

	#[test]
	fn test_mat3_round_trip() {
		let m = Mat3::new(Vec3::new(0.0, 1.0, 2.0), Vec3::new(3.0, 4.0, 5.0), Vec3::new(6.0, 7.0, 8.0));
		let mut data = vec![];
		data.write_mat3_le(&m).unwrap();
		assert_eq!(36, data.len());
		assert_eq!(m, data.as_slice().read_mat3_le().unwrap());
	}
}
