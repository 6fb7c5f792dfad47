//! Linux implementation of the platform layer.

use std::io;
use std::mem;
use std::os::fd::{BorrowedFd, RawFd};
use std::time::Duration;

use nix::errno::Errno;
use nix::net::if_;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};

use super::Platform;

/// OS-level transport handle.
pub type RawHandle = RawFd;

/// Sentinel stored in a socket whose handle is not open.
pub(crate) const INVALID_HANDLE: RawHandle = -1;

pub(crate) struct Linux;

/// Platform implementation selected for this build.
pub(crate) type Os = Linux;

fn cvt(ret: libc::c_int) -> io::Result<libc::c_int> {
    if ret == -1 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret)
    }
}

fn cvt_size(ret: libc::ssize_t) -> io::Result<usize> {
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret as usize)
    }
}

impl Platform for Linux {
    fn close(handle: RawHandle) -> io::Result<()> {
        cvt(unsafe { libc::close(handle) }).map(drop)
    }

    fn shutdown(handle: RawHandle) -> io::Result<()> {
        cvt(unsafe { libc::shutdown(handle, libc::SHUT_RDWR) }).map(drop)
    }

    fn set_nonblocking(handle: RawHandle, nonblocking: bool) -> io::Result<()> {
        let flags = cvt(unsafe { libc::fcntl(handle, libc::F_GETFL) })?;
        let flags = if nonblocking {
            flags | libc::O_NONBLOCK
        } else {
            flags & !libc::O_NONBLOCK
        };
        cvt(unsafe { libc::fcntl(handle, libc::F_SETFL, flags) }).map(drop)
    }

    fn wait_readable(handle: RawHandle, timeout: Duration) -> io::Result<bool> {
        // poll() takes milliseconds; round up so short timeouts still wait.
        let millis = timeout.as_micros().div_ceil(1000).min(i32::MAX as u128) as i32;
        let timeout = PollTimeout::try_from(millis)
            .map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;

        // The caller keeps the handle open for the duration of the call.
        let fd = unsafe { BorrowedFd::borrow_raw(handle) };
        loop {
            let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
            match poll(&mut fds, timeout) {
                Ok(0) => return Ok(false),
                Ok(_) => return Ok(fds[0].revents().is_some_and(|events| !events.is_empty())),
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

/// Open a close-on-exec socket.
pub(crate) fn socket(
    domain: libc::c_int,
    ty: libc::c_int,
    protocol: libc::c_int,
) -> io::Result<RawHandle> {
    cvt(unsafe { libc::socket(domain, ty | libc::SOCK_CLOEXEC, protocol) })
}

/// Set a socket option from a plain value.
pub(crate) fn set_option<T: Copy>(
    handle: RawHandle,
    level: libc::c_int,
    name: libc::c_int,
    value: T,
) -> io::Result<()> {
    let ret = unsafe {
        libc::setsockopt(
            handle,
            level,
            name,
            &value as *const T as *const libc::c_void,
            mem::size_of::<T>() as libc::socklen_t,
        )
    };
    cvt(ret).map(drop)
}

/// Resolve an interface name to its kernel index.
pub(crate) fn interface_index(name: &str) -> io::Result<u32> {
    Ok(if_::if_nametoindex(name)?)
}

/// Query the configured MTU of an interface through any open socket.
pub(crate) fn interface_mtu(handle: RawHandle, name: &str) -> io::Result<usize> {
    let mut request: libc::ifreq = unsafe { mem::zeroed() };
    if name.len() >= libc::IFNAMSIZ {
        return Err(Errno::ENAMETOOLONG.into());
    }
    for (dst, src) in request.ifr_name.iter_mut().zip(name.bytes()) {
        *dst = src as libc::c_char;
    }

    cvt(unsafe { libc::ioctl(handle, libc::SIOCGIFMTU as _, &mut request as *mut libc::ifreq) })?;
    let mtu = unsafe { request.ifr_ifru.ifru_mtu };
    Ok(mtu.max(0) as usize)
}

/// Build an IPv4 socket address from a host-order address and port.
pub(crate) fn ipv4_sockaddr(address: u32, port: u16) -> libc::sockaddr_in {
    let mut addr: libc::sockaddr_in = unsafe { mem::zeroed() };
    addr.sin_family = libc::AF_INET as libc::sa_family_t;
    addr.sin_port = port.to_be();
    addr.sin_addr = libc::in_addr {
        s_addr: address.to_be(),
    };
    addr
}

pub(crate) fn bind_ipv4(handle: RawHandle, addr: &libc::sockaddr_in) -> io::Result<()> {
    let ret = unsafe {
        libc::bind(
            handle,
            addr as *const libc::sockaddr_in as *const libc::sockaddr,
            mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        )
    };
    cvt(ret).map(drop)
}

pub(crate) fn connect_ipv4(handle: RawHandle, addr: &libc::sockaddr_in) -> io::Result<()> {
    let ret = unsafe {
        libc::connect(
            handle,
            addr as *const libc::sockaddr_in as *const libc::sockaddr,
            mem::size_of::<libc::sockaddr_in>() as libc::socklen_t,
        )
    };
    cvt(ret).map(drop)
}

pub(crate) fn listen(handle: RawHandle, backlog: libc::c_int) -> io::Result<()> {
    cvt(unsafe { libc::listen(handle, backlog) }).map(drop)
}

/// Accept one pending connection, returning the new handle and the peer's
/// host-order address and port.
pub(crate) fn accept(handle: RawHandle) -> io::Result<(RawHandle, u32, u16)> {
    let mut peer: libc::sockaddr_in = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
    let fd = cvt(unsafe {
        libc::accept4(
            handle,
            &mut peer as *mut libc::sockaddr_in as *mut libc::sockaddr,
            &mut len,
            libc::SOCK_CLOEXEC,
        )
    })?;
    Ok((
        fd,
        u32::from_be(peer.sin_addr.s_addr),
        u16::from_be(peer.sin_port),
    ))
}

/// Host-order address and port a socket is bound to.
pub(crate) fn local_ipv4(handle: RawHandle) -> io::Result<(u32, u16)> {
    let mut addr: libc::sockaddr_in = unsafe { mem::zeroed() };
    let mut len = mem::size_of::<libc::sockaddr_in>() as libc::socklen_t;
    cvt(unsafe {
        libc::getsockname(
            handle,
            &mut addr as *mut libc::sockaddr_in as *mut libc::sockaddr,
            &mut len,
        )
    })?;
    Ok((u32::from_be(addr.sin_addr.s_addr), u16::from_be(addr.sin_port)))
}

/// Send without raising SIGPIPE on a broken connection.
pub(crate) fn send(handle: RawHandle, buf: &[u8]) -> io::Result<usize> {
    cvt_size(unsafe {
        libc::send(
            handle,
            buf.as_ptr() as *const libc::c_void,
            buf.len(),
            libc::MSG_NOSIGNAL,
        )
    })
}

pub(crate) fn recv(handle: RawHandle, buf: &mut [u8]) -> io::Result<usize> {
    cvt_size(unsafe { libc::recv(handle, buf.as_mut_ptr() as *mut libc::c_void, buf.len(), 0) })
}

/// Apply a scheduling policy and static priority to the calling thread.
pub(crate) fn set_thread_scheduler(policy: libc::c_int, priority: libc::c_int) -> io::Result<()> {
    let mut param: libc::sched_param = unsafe { mem::zeroed() };
    param.sched_priority = priority;
    // pthread functions return the error number instead of setting errno.
    match unsafe { libc::pthread_setschedparam(libc::pthread_self(), policy, &param) } {
        0 => Ok(()),
        err => Err(io::Error::from_raw_os_error(err)),
    }
}

/// Lock all current and future pages of the process into RAM.
pub(crate) fn lock_memory() -> io::Result<()> {
    cvt(unsafe { libc::mlockall(libc::MCL_CURRENT | libc::MCL_FUTURE) }).map(drop)
}

/// Read the monotonic clock as `(seconds, nanoseconds)`.
pub(crate) fn monotonic_now() -> io::Result<(i64, i64)> {
    let mut ts: libc::timespec = unsafe { mem::zeroed() };
    cvt(unsafe { libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts) })?;
    Ok((ts.tv_sec as i64, ts.tv_nsec as i64))
}

/// Sleep until an absolute monotonic time. A deadline in the past returns
/// immediately.
pub(crate) fn sleep_until(sec: i64, nsec: i64) -> io::Result<()> {
    let mut deadline: libc::timespec = unsafe { mem::zeroed() };
    deadline.tv_sec = sec as libc::time_t;
    deadline.tv_nsec = nsec as _;
    loop {
        let ret = unsafe {
            libc::clock_nanosleep(
                libc::CLOCK_MONOTONIC,
                libc::TIMER_ABSTIME,
                &deadline,
                std::ptr::null_mut(),
            )
        };
        match ret {
            0 => return Ok(()),
            libc::EINTR => continue,
            err => return Err(io::Error::from_raw_os_error(err)),
        }
    }
}
