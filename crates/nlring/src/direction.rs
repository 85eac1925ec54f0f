use crate::channel::{NETLINK_RX_RING, NETLINK_TX_RING};
use crate::RingError;
use std::fmt;

/// Which side of the mapped ring a descriptor serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Kernel to user space.
    Rx,
    /// User space to kernel.
    Tx,
}

impl Direction {
    /// Both directions, in mapping layout order.
    pub const ALL: [Direction; 2] = [Direction::Rx, Direction::Tx];

    /// Socket option used to register a ring for this direction.
    #[inline]
    pub const fn socket_option(self) -> libc::c_int {
        match self {
            Direction::Rx => NETLINK_RX_RING,
            Direction::Tx => NETLINK_TX_RING,
        }
    }

    /// Raw tag of this direction (`0` = rx, `1` = tx).
    #[inline]
    pub const fn tag(self) -> u32 {
        match self {
            Direction::Rx => 0,
            Direction::Tx => 1,
        }
    }
}

impl TryFrom<u32> for Direction {
    type Error = RingError;

    fn try_from(tag: u32) -> Result<Self, Self::Error> {
        match tag {
            0 => Ok(Direction::Rx),
            1 => Ok(Direction::Tx),
            other => Err(RingError::InvalidDirection(other)),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Rx => "rx",
            Direction::Tx => "tx",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_conversion() {
        for direction in Direction::ALL {
            assert_eq!(Direction::try_from(direction.tag()).unwrap(), direction);
        }
        assert!(matches!(
            Direction::try_from(2),
            Err(RingError::InvalidDirection(2))
        ));
    }

    #[test]
    fn test_socket_options() {
        assert_eq!(Direction::Rx.socket_option(), 6);
        assert_eq!(Direction::Tx.socket_option(), 7);
    }
}
