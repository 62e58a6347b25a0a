use std::collections::HashMap;

/// Label for a property record with no matching schema entry
pub const OOB_MEMBER: &str = "OOB";

#[derive(Clone, Debug)]
pub struct ClassInfo {
	pub name: String,
	pub members: Vec<String>,
}

/// Per-type metadata fed in by the host: a display name and the ordered
/// member-name schema the property records of that type line up with,
/// index for index. Loading the metadata itself happens outside the core.
#[derive(Clone, Debug, Default)]
pub struct ClassRegistry {
	classes: HashMap<u32, ClassInfo>,
}

impl ClassRegistry {
	pub fn new() -> ClassRegistry {
		ClassRegistry::default()
	}

	pub fn insert(&mut self, type_code: u32, name: &str, members: Vec<String>) {
		self.classes.insert(type_code, ClassInfo {
			name: name.to_string(),
			members: members,
		});
	}

	pub fn class_name(&self, type_code: u32) -> Option<&str> {
		self.classes.get(&type_code).map(|c| c.name.as_str())
	}

	pub fn member_names(&self, type_code: u32) -> &[String] {
		match self.classes.get(&type_code) {
			Some(c) => c.members.as_slice(),
			None => &[],
		}
	}

	/// Schema name for the record at `index`, or [`OOB_MEMBER`] when the
	/// record has no mapped member. Unmapped records are still shown, just
	/// under this label.
	pub fn member_label(&self, type_code: u32, index: usize) -> &str {
		match self.member_names(type_code).get(index) {
			Some(name) => name.as_str(),
			None => OOB_MEMBER,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_member_labels() {
		let mut reg = ClassRegistry::new();
		reg.insert(0x21, "ZLight", vec!["Range".to_string(), "Color".to_string()]);

		assert_eq!(reg.class_name(0x21), Some("ZLight"));
		assert_eq!(reg.member_label(0x21, 0), "Range");
		assert_eq!(reg.member_label(0x21, 1), "Color");
		assert_eq!(reg.member_label(0x21, 2), OOB_MEMBER);
		assert_eq!(reg.member_label(0x99, 0), OOB_MEMBER);
		assert!(reg.member_names(0x99).is_empty());
	}
}
