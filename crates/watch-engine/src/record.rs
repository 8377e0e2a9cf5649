//! Binary record codec.
//!
//! Layout, native endian: `i32 handle | u32 mask | u32 cookie | u32 len | name[len]`, where the
//! name is NUL padded up to `len` bytes.

use std::{
	ffi::OsString,
	path::{Path, PathBuf},
};

use crate::{backend::WatchHandle, error::ContractViolation, mask::EventMask};

/// Size of the fixed record header.
pub const HEADER_LEN: usize = size_of::<i32>() + 3 * size_of::<u32>();

/// ASCII end-of-text; some kernels leave it dangling at the end of child names.
const ETX: u8 = 0x03;

/// One decoded notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
	pub handle: WatchHandle,
	pub mask: EventMask,
	pub cookie: u32,
	/// Name of the child the event refers to, if the event happened inside a watched directory.
	pub name: Option<OsString>,
}

impl RawRecord {
	#[must_use]
	pub fn new(handle: WatchHandle, mask: EventMask) -> Self {
		Self {
			handle,
			mask,
			cookie: 0,
			name: None,
		}
	}

	#[must_use]
	pub fn with_name(mut self, name: impl Into<OsString>) -> Self {
		self.name = Some(name.into());
		self
	}

	#[must_use]
	pub const fn with_cookie(mut self, cookie: u32) -> Self {
		self.cookie = cookie;
		self
	}

	/// Path this record refers to, given the path of the watch it was delivered on.
	#[must_use]
	pub fn child_of(&self, base: &Path) -> PathBuf {
		self.name
			.as_ref()
			.map_or_else(|| base.to_path_buf(), |name| base.join(name))
	}

	/// Encodes the record, padding the name to a multiple of the header alignment.
	#[must_use]
	pub fn encode(&self) -> Vec<u8> {
		let name = self.name.as_ref().map(name_bytes).unwrap_or_default();
		let padded_len = if name.is_empty() {
			0
		} else {
			(name.len() + 1).next_multiple_of(size_of::<u32>())
		};

		let mut buf = Vec::with_capacity(HEADER_LEN + padded_len);
		buf.extend_from_slice(&self.handle.raw().to_ne_bytes());
		buf.extend_from_slice(&self.mask.bits().to_ne_bytes());
		buf.extend_from_slice(&self.cookie.to_ne_bytes());
		buf.extend_from_slice(&u32::try_from(padded_len).unwrap_or(u32::MAX).to_ne_bytes());
		buf.extend_from_slice(&name);
		buf.resize(HEADER_LEN + padded_len, 0);
		buf
	}
}

/// Iterator over the records in one read buffer.
///
/// Yields an error and then stops if a record runs past the end of the buffer.
#[derive(Debug)]
pub struct Records<'buf> {
	buf: &'buf [u8],
	offset: usize,
	failed: bool,
}

#[must_use]
pub fn parse(buf: &[u8]) -> Records<'_> {
	Records {
		buf,
		offset: 0,
		failed: false,
	}
}

impl Iterator for Records<'_> {
	type Item = Result<RawRecord, ContractViolation>;

	fn next(&mut self) -> Option<Self::Item> {
		if self.failed || self.offset >= self.buf.len() {
			return None;
		}

		let truncated = ContractViolation::TruncatedRecord {
			offset: self.offset,
			len: self.buf.len(),
		};

		let Some(header) = self.buf.get(self.offset..self.offset + HEADER_LEN) else {
			self.failed = true;
			return Some(Err(truncated));
		};

		let handle = i32::from_ne_bytes(word(header, 0));
		let mask = u32::from_ne_bytes(word(header, 1));
		let cookie = u32::from_ne_bytes(word(header, 2));
		let name_len = u32::from_ne_bytes(word(header, 3)) as usize;

		let name_start = self.offset + HEADER_LEN;
		let Some(raw_name) = self.buf.get(name_start..name_start + name_len) else {
			self.failed = true;
			return Some(Err(truncated));
		};

		self.offset = name_start + name_len;

		Some(Ok(RawRecord {
			handle: WatchHandle::new(handle),
			mask: EventMask::from_bits_retain(mask),
			cookie,
			name: decode_name(raw_name),
		}))
	}
}

fn word(header: &[u8], index: usize) -> [u8; 4] {
	let mut bytes = [0; 4];
	bytes.copy_from_slice(&header[index * 4..index * 4 + 4]);
	bytes
}

fn decode_name(raw: &[u8]) -> Option<OsString> {
	let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
	let mut name = &raw[..end];
	while let [rest @ .., ETX] = name {
		name = rest;
	}

	(!name.is_empty()).then(|| os_string_from_bytes(name))
}

#[cfg(unix)]
fn os_string_from_bytes(bytes: &[u8]) -> OsString {
	use std::os::unix::ffi::OsStrExt;

	std::ffi::OsStr::from_bytes(bytes).to_os_string()
}

#[cfg(not(unix))]
fn os_string_from_bytes(bytes: &[u8]) -> OsString {
	OsString::from(String::from_utf8_lossy(bytes).into_owned())
}

#[cfg(unix)]
fn name_bytes(name: &OsString) -> Vec<u8> {
	use std::os::unix::ffi::OsStrExt;

	name.as_bytes().to_vec()
}

#[cfg(not(unix))]
fn name_bytes(name: &OsString) -> Vec<u8> {
	name.to_string_lossy().into_owned().into_bytes()
}
