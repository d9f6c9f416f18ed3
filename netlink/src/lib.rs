pub mod core;
pub mod error;
pub mod handle;
pub mod netlink;
pub mod types;

pub use error::{errno_of, is_exists, is_not_found, NetlinkError};
pub use netlink::Netlink;

pub fn align_of(len: usize, align_to: usize) -> usize {
    (len + align_to - 1) & !(align_to - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_of() {
        assert_eq!(align_of(0x10, 0x4), 0x10);
        assert_eq!(align_of(0x7, 0x4), 0x8);
    }
}
