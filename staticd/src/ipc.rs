// Copyright 2022 Ryan Seipp
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Transfers an open socket descriptor across the acceptor/worker process
//! boundary using `SCM_RIGHTS` ancillary data over a `UnixStream` pair.
//!
//! Passing the raw integer value of a descriptor across a `fork()` boundary
//! is meaningless once the receiving process's descriptor table diverges
//! from the sender's; the kernel has to be asked, via `sendmsg`/`recvmsg`,
//! to materialize a new descriptor in the receiver aimed at the same
//! underlying open file description.

use std::fmt::Display;
use std::io;
use std::mem::MaybeUninit;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream;

/// Failure transferring a descriptor across a channel.
#[derive(Debug)]
pub enum TransportError {
    /// The underlying syscall failed.
    Io(io::Error),
    /// `recvmsg` succeeded but carried no `SCM_RIGHTS` ancillary data.
    NoDescriptor,
}

impl Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Io(e) => write!(f, "transport error: {e}"),
            TransportError::NoDescriptor => {
                f.write_str("transport error: message carried no descriptor")
            }
        }
    }
}

impl std::error::Error for TransportError {}

/// Outcome of [`recv`].
#[derive(Debug)]
pub enum RecvOutcome {
    /// A descriptor arrived.
    Descriptor(OwnedFd),
    /// The peer closed its end of the channel and no more messages are
    /// pending. This is the shutdown signal a worker's receive loop waits
    /// for.
    EndOfStream,
}

/// Sends `fd` across `channel`, accompanied by a single payload byte (the
/// kernel requires ancillary data to ride along with at least one ordinary
/// byte of the stream).
///
/// The caller retains ownership of `fd` — on success, it is the caller's
/// responsibility to close its own copy immediately afterward so the
/// underlying kernel object isn't held open from both ends.
pub fn send(channel: &UnixStream, fd: RawFd) -> Result<(), TransportError> {
    let payload = [0u8; 1];
    let iov = libc::iovec {
        iov_base: payload.as_ptr() as *mut libc::c_void,
        iov_len: payload.len(),
    };

    let space = unsafe { libc::CMSG_SPACE(std::mem::size_of::<RawFd>() as u32) } as usize;
    let mut cmsg_buf = vec![0u8; space];

    let mut msg: libc::msghdr = unsafe { MaybeUninit::zeroed().assume_init() };
    msg.msg_iov = &iov as *const _ as *mut _;
    msg.msg_iovlen = 1;
    msg.msg_control = cmsg_buf.as_mut_ptr() as *mut libc::c_void;
    msg.msg_controllen = cmsg_buf.len() as _;

    unsafe {
        let cmsg = libc::CMSG_FIRSTHDR(&msg);
        (*cmsg).cmsg_level = libc::SOL_SOCKET;
        (*cmsg).cmsg_type = libc::SCM_RIGHTS;
        (*cmsg).cmsg_len = libc::CMSG_LEN(std::mem::size_of::<RawFd>() as u32) as _;
        std::ptr::write_unaligned(libc::CMSG_DATA(cmsg) as *mut RawFd, fd);
    }

    let sent = unsafe { libc::sendmsg(channel.as_raw_fd(), &msg, 0) };
    if sent < 0 {
        return Err(TransportError::Io(io::Error::last_os_error()));
    }

    Ok(())
}

/// Blocks until a message carrying exactly one descriptor arrives on
/// `channel`, or the peer closes its end.
pub fn recv(channel: &UnixStream) -> Result<RecvOutcome, TransportError> {
    let mut payload = [0u8; 1];
    let mut iov = libc::iovec {
        iov_base: payload.as_mut_ptr() as *mut libc::c_void,
        iov_len: payload.len(),
    };

    let space = unsafe { libc::CMSG_SPACE(std::mem::size_of::<RawFd>() as u32) } as usize;
    let mut cmsg_buf = vec![0u8; space];

    let mut msg: libc::msghdr = unsafe { MaybeUninit::zeroed().assume_init() };
    msg.msg_iov = &mut iov;
    msg.msg_iovlen = 1;
    msg.msg_control = cmsg_buf.as_mut_ptr() as *mut libc::c_void;
    msg.msg_controllen = cmsg_buf.len() as _;

    let received = unsafe { libc::recvmsg(channel.as_raw_fd(), &mut msg, 0) };
    if received < 0 {
        return Err(TransportError::Io(io::Error::last_os_error()));
    }
    if received == 0 {
        return Ok(RecvOutcome::EndOfStream);
    }

    let cmsg = unsafe { libc::CMSG_FIRSTHDR(&msg) };
    if cmsg.is_null() {
        return Err(TransportError::NoDescriptor);
    }

    unsafe {
        if (*cmsg).cmsg_level != libc::SOL_SOCKET || (*cmsg).cmsg_type != libc::SCM_RIGHTS {
            return Err(TransportError::NoDescriptor);
        }
        let fd = std::ptr::read_unaligned(libc::CMSG_DATA(cmsg) as *const RawFd);
        Ok(RecvOutcome::Descriptor(OwnedFd::from_raw_fd(fd)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::os::unix::io::IntoRawFd;

    #[test]
    fn send_then_recv_yields_a_working_descriptor_in_order() {
        let (a, b) = UnixStream::pair().unwrap();

        let l1 = TcpListener::bind("127.0.0.1:0").unwrap();
        let l2 = TcpListener::bind("127.0.0.1:0").unwrap();
        let port1 = l1.local_addr().unwrap().port();
        let port2 = l2.local_addr().unwrap().port();
        let fd1 = l1.into_raw_fd();
        let fd2 = l2.into_raw_fd();

        send(&a, fd1).unwrap();
        unsafe { libc::close(fd1) };
        send(&a, fd2).unwrap();
        unsafe { libc::close(fd2) };

        let first = match recv(&b).unwrap() {
            RecvOutcome::Descriptor(fd) => fd,
            RecvOutcome::EndOfStream => panic!("expected a descriptor"),
        };
        let second = match recv(&b).unwrap() {
            RecvOutcome::Descriptor(fd) => fd,
            RecvOutcome::EndOfStream => panic!("expected a descriptor"),
        };

        // Order is preserved: the first fd sent corresponds to the listener
        // bound to port1.
        let received_listener = unsafe { std::net::TcpListener::from_raw_fd(first.as_raw_fd()) };
        assert_eq!(port1, received_listener.local_addr().unwrap().port());
        std::mem::forget(received_listener);

        let received_listener2 = unsafe { std::net::TcpListener::from_raw_fd(second.as_raw_fd()) };
        assert_eq!(port2, received_listener2.local_addr().unwrap().port());
        std::mem::forget(received_listener2);
    }

    #[test]
    fn recv_observes_end_of_stream_when_peer_is_dropped() {
        let (a, b) = UnixStream::pair().unwrap();
        drop(a);
        match recv(&b).unwrap() {
            RecvOutcome::EndOfStream => {}
            RecvOutcome::Descriptor(_) => panic!("expected end of stream"),
        }
    }
}
