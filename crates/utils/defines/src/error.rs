use core::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Error(i32);

impl Error {
    #[inline]
    pub fn as_i32(self) -> i32 {
        self.0
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(errno::error_info(self.0))
    }
}

pub type KResult<T = ()> = core::result::Result<T, Error>;

pub mod errno {
    macro_rules! declare_errno {
        ($($name:tt, $errno:literal, $desc:literal,)*) => {
            $(#[doc = $desc]
            pub const $name: super::Error = super::Error($errno);)*
            pub fn error_info(errno: i32) -> &'static str {
                match errno {
                    $($errno => ::core::concat!(stringify!($name), ", ", $desc),)*
                    _ => "UNKNOWN, Unknown error",
                }
            }
        };
    }

    // 缺页处理相关的错误码不对应任何 Linux errno，放在负数高位以免冲突
    #[rustfmt::skip]
    declare_errno!(
        THREAD_KILLED,  -1023,  "Thread was killed while suspended",
        ALREADY_VALID,  -1022,  "Page was already valid when the fault was handled",

        ESRCH,          -3,     "No such task.",
        EIO,            -5,     "I/O error.",
        EBADF,          -9,     "Swap file is closed.",
        EAGAIN,         -11,    "Try again.",
        ENOMEM,         -12,    "Out of memory",
        EFAULT,         -14,    "Bad address.",
        EINVAL,         -22,    "Invalid argument.",
    );
}
