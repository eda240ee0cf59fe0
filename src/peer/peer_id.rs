use std::fmt;

/// A swarm-unique, non-negative peer identifier.
///
/// On the wire the identifier is a 4-byte big-endian signed integer, so only
/// values up to `i32::MAX` can be represented.
///
/// # Examples
///
/// ```
/// use swarmcast::peer::PeerId;
///
/// let id = PeerId::new(1001).unwrap();
/// assert_eq!(id.get(), 1001);
/// assert_eq!(id.to_be_bytes(), [0, 0, 3, 233]);
/// assert!(PeerId::from_wire(-1).is_none());
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeerId(u32);

impl PeerId {
    /// Creates a peer ID, returning `None` if it cannot be sent on the wire.
    pub fn new(id: u32) -> Option<Self> {
        if id > i32::MAX as u32 {
            return None;
        }
        Some(Self(id))
    }

    /// Converts the signed wire representation, rejecting negative values.
    pub fn from_wire(raw: i32) -> Option<Self> {
        u32::try_from(raw).ok().map(Self)
    }

    pub fn get(&self) -> u32 {
        self.0
    }

    pub fn to_be_bytes(&self) -> [u8; 4] {
        self.0.to_be_bytes()
    }
}

impl fmt::Debug for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerId({})", self.0)
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}
