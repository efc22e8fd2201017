//! SCM_RIGHTS fd hand-off (spec.md §2.2/§4.7)
//!
//! `wavehub-shm` owns the mapping and byte layout of a stream's region but
//! deliberately not the fd hand-off to the client; that socket-layer
//! concern lives here, the one place in the workspace that talks `libc`
//! directly.

use std::io;
use std::mem;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;

/// Send `fd` to the peer of `socket` as ancillary data, with a single
/// placeholder data byte (required by `sendmsg`; ancillary data cannot be
/// sent alone).
pub fn send_fd(socket: &UnixStream, fd: RawFd) -> io::Result<()> {
    let mut placeholder = [0u8; 1];
    let mut iov = libc::iovec {
        iov_base: placeholder.as_mut_ptr() as *mut libc::c_void,
        iov_len: placeholder.len(),
    };

    let cmsg_space = unsafe { libc::CMSG_SPACE(mem::size_of::<RawFd>() as u32) } as usize;
    let mut cmsg_buf = vec![0u8; cmsg_space];

    let mut msg: libc::msghdr = unsafe { mem::zeroed() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = cmsg_buf.as_mut_ptr() as *mut libc::c_void;
    msg.msg_controllen = cmsg_buf.len() as _;

    unsafe {
        let cmsg = libc::CMSG_FIRSTHDR(&msg);
        (*cmsg).cmsg_level = libc::SOL_SOCKET;
        (*cmsg).cmsg_type = libc::SCM_RIGHTS;
        (*cmsg).cmsg_len = libc::CMSG_LEN(mem::size_of::<RawFd>() as u32) as _;
        std::ptr::write(libc::CMSG_DATA(cmsg) as *mut RawFd, fd);
    }

    let ret = unsafe { libc::sendmsg(socket.as_raw_fd(), &msg, 0) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
