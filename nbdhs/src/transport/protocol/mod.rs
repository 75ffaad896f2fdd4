pub mod handshake;
pub mod io;

use bitflags::bitflags;

// https://github.com/NetworkBlockDevice/nbd/blob/master/doc/proto.md
pub mod consts {
    // Greeting
    pub const NBD_MAGIC: &[u8; 8] = b"NBDMAGIC";
    pub const NBD_IHAVEOPT: &[u8; 8] = b"IHAVEOPT";
    // Sent in place of IHAVEOPT by servers that only speak oldstyle negotiation
    pub const NBD_CLISERV_MAGIC: u64 = 0x00420281861253;

    // Handshake (Server)
    pub const NBD_FLAG_FIXED_NEWSTYLE: u16 = 1 << 0;
    pub const NBD_FLAG_NO_ZEROES: u16 = 1 << 1;
}

bitflags! {
    /// The 16 bit handshake flags field a newstyle server sends right after `IHAVEOPT`.
    ///
    /// Bits this crate doesn't name are kept as they are, so `bits()` always
    /// returns exactly what came off the wire.
    #[derive(PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Clone, Copy)]
    pub struct HandshakeFlags: u16 {
        /// Mandatory baseline bit. Servers that don't set it aren't fixed newstyle.
        const FIXED_NEWSTYLE = consts::NBD_FLAG_FIXED_NEWSTYLE;
        const NO_ZEROES = consts::NBD_FLAG_NO_ZEROES;
    }
}

impl HandshakeFlags {
    /// The minimal flag set a client insists on.
    pub const REQUIRED: HandshakeFlags = HandshakeFlags::FIXED_NEWSTYLE;

    pub fn from_wire(raw: u16) -> Self {
        HandshakeFlags::from_bits_retain(raw)
    }

    /// `(self & required) == required`
    pub fn satisfies(self, required: HandshakeFlags) -> bool {
        self.bits() & required.bits() == required.bits()
    }
}
