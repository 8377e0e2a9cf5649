//! inotify(7) channel, paired with an eventfd so a blocked poll can be woken from another thread.

use std::{
	ffi::CString,
	io,
	os::{
		fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd},
		unix::ffi::OsStrExt,
	},
	path::Path,
	time::Duration,
};

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::{Backend, WatchHandle};
use crate::{
	error::{Error, Result},
	mask::EventMask,
};

#[derive(Debug)]
pub struct InotifyBackend {
	inotify: Mutex<Option<OwnedFd>>,
	waker: OwnedFd,
}

impl InotifyBackend {
	/// Opens a fresh inotify instance.
	pub fn open() -> Result<Self> {
		// SAFETY: plain syscalls; the returned descriptors are owned right away
		let inotify = cvt(unsafe { libc::inotify_init1(libc::IN_CLOEXEC | libc::IN_NONBLOCK) })
			.map_err(Error::ChannelUnavailable)?;
		let inotify = unsafe { OwnedFd::from_raw_fd(inotify) };

		let waker = cvt(unsafe { libc::eventfd(0, libc::EFD_CLOEXEC | libc::EFD_NONBLOCK) })
			.map_err(Error::ChannelUnavailable)?;
		let waker = unsafe { OwnedFd::from_raw_fd(waker) };

		debug!(fd = inotify.as_raw_fd(), "Opened inotify instance");

		Ok(Self {
			inotify: Mutex::new(Some(inotify)),
			waker,
		})
	}

	fn fd(&self) -> io::Result<RawFd> {
		self.inotify
			.lock()
			.as_ref()
			.map(AsRawFd::as_raw_fd)
			.ok_or_else(|| io::Error::from_raw_os_error(libc::EBADF))
	}

	fn drain_waker(&self) {
		let mut counter = 0u64;
		// SAFETY: reads exactly one u64 into a local
		let _ = unsafe {
			libc::read(
				self.waker.as_raw_fd(),
				std::ptr::addr_of_mut!(counter).cast(),
				size_of::<u64>(),
			)
		};
	}
}

fn cvt(ret: libc::c_int) -> io::Result<libc::c_int> {
	if ret == -1 {
		Err(io::Error::last_os_error())
	} else {
		Ok(ret)
	}
}

impl Backend for InotifyBackend {
	fn kind(&self) -> &'static str {
		"inotify"
	}

	fn register(&self, path: &Path, mask: EventMask) -> io::Result<WatchHandle> {
		let c_path = CString::new(path.as_os_str().as_bytes())
			.map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

		// SAFETY: `c_path` outlives the call
		let wd = cvt(unsafe {
			libc::inotify_add_watch(
				self.fd()?,
				c_path.as_ptr(),
				mask.bits() | libc::IN_DONT_FOLLOW,
			)
		})?;

		trace!(wd, path = %path.display(), "inotify_add_watch");
		Ok(WatchHandle::new(wd))
	}

	fn deregister(&self, handle: WatchHandle) -> io::Result<()> {
		// SAFETY: invalid descriptors are reported through errno
		cvt(unsafe { libc::inotify_rm_watch(self.fd()?, handle.raw()) })?;
		trace!(%handle, "inotify_rm_watch");
		Ok(())
	}

	fn pending_bytes(&self) -> io::Result<usize> {
		let mut pending: libc::c_int = 0;
		// SAFETY: FIONREAD writes one c_int
		cvt(unsafe { libc::ioctl(self.fd()?, libc::FIONREAD, std::ptr::addr_of_mut!(pending)) })?;
		Ok(usize::try_from(pending).unwrap_or(0))
	}

	fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
		// SAFETY: the kernel writes at most `buf.len()` bytes into `buf`
		let read = unsafe { libc::read(self.fd()?, buf.as_mut_ptr().cast(), buf.len()) };
		if read < 0 {
			let e = io::Error::last_os_error();
			// Non-blocking descriptor with nothing left to hand out
			return if e.kind() == io::ErrorKind::WouldBlock {
				Ok(0)
			} else {
				Err(e)
			};
		}

		Ok(read.unsigned_abs())
	}

	fn wait(&self, timeout: Duration) -> io::Result<bool> {
		let mut fds = [
			libc::pollfd {
				fd: self.fd()?,
				events: libc::POLLIN,
				revents: 0,
			},
			libc::pollfd {
				fd: self.waker.as_raw_fd(),
				events: libc::POLLIN,
				revents: 0,
			},
		];
		let timeout = libc::c_int::try_from(timeout.as_millis()).unwrap_or(libc::c_int::MAX);

		// SAFETY: `fds` is a valid array of two pollfd
		let ready = unsafe { libc::poll(fds.as_mut_ptr(), 2, timeout) };
		if ready < 0 {
			let e = io::Error::last_os_error();
			return if e.kind() == io::ErrorKind::Interrupted {
				Ok(false)
			} else {
				Err(e)
			};
		}

		if fds[1].revents & libc::POLLIN != 0 {
			self.drain_waker();
		}

		Ok(fds[0].revents & libc::POLLIN != 0)
	}

	fn interrupt(&self) {
		let one = 1u64;
		// SAFETY: writes exactly one u64 from a local
		let _ = unsafe {
			libc::write(
				self.waker.as_raw_fd(),
				std::ptr::addr_of!(one).cast(),
				size_of::<u64>(),
			)
		};
	}

	fn close(&self) -> io::Result<()> {
		let Some(fd) = self.inotify.lock().take() else {
			return Ok(());
		};

		// Closed by hand so a failure can be reported, `OwnedFd` ignores it
		let raw = fd.into_raw_fd();
		// SAFETY: `raw` was just released from its owner and is closed exactly once
		cvt(unsafe { libc::close(raw) })?;
		debug!(fd = raw, "Closed inotify instance");
		Ok(())
	}
}
