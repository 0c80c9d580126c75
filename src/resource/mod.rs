//! # Resource Containers
//!
//! Target architecture selection and unpacking of the resource container that
//! wraps a compiled script.

use crate::{Error, Result};
use std::path::Path;

/// Size of the resource header preceding the payload
pub const HEADER_SIZE: usize = 16;

/// Target architecture of a script file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    /// Console build (`.xsc`), big-endian
    Xbox360,
    /// PC build (`.ysc`), little-endian
    Pc,
}

impl Arch {
    /// Select the architecture from the marker in a file name
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map_or_else(|| path.to_string_lossy(), |name| name.to_string_lossy());
        if name.contains("xsc") {
            Ok(Arch::Xbox360)
        } else if name.contains("ysc") {
            Ok(Arch::Pc)
        } else {
            Err(Error::UnknownArchitecture {
                path: path.display().to_string(),
            })
        }
    }

    /// Whether multi-byte fields are stored big-endian
    pub fn is_big_endian(self) -> bool {
        self == Arch::Xbox360
    }

    /// Container magic as it appears on disk
    pub fn magic(self) -> [u8; 4] {
        match self {
            Arch::Xbox360 => *b"RSC\x85",
            Arch::Pc => *b"RSC7",
        }
    }

    /// Read a `u32` in this architecture's byte order
    pub fn read_u32(self, bytes: [u8; 4]) -> u32 {
        if self.is_big_endian() {
            u32::from_be_bytes(bytes)
        } else {
            u32::from_le_bytes(bytes)
        }
    }
}

/// An unpacked resource container
#[derive(Debug, Clone)]
pub struct Container {
    /// Display name (usually the file name)
    pub name: String,
    /// Target architecture
    pub arch: Arch,
    /// Resource version
    pub version: u32,
    /// System segment flags
    pub system_flags: u32,
    /// Graphics segment flags
    pub graphics_flags: u32,
    payload: Vec<u8>,
}

impl Container {
    /// Validate the resource header and locate the embedded script
    ///
    /// `size` is the declared total length; it may not exceed `data`.
    pub fn unpack(data: &[u8], name: &str, size: u32, arch: Arch) -> Result<Self> {
        let size = size as usize;
        if size > data.len() {
            return Err(Error::InvalidContainer(format!(
                "{}: declared size {} exceeds {} bytes of data",
                name,
                size,
                data.len()
            )));
        }
        if size < HEADER_SIZE {
            return Err(Error::InvalidContainer(format!(
                "{}: {} bytes is too small for a resource header",
                name, size
            )));
        }

        let data = &data[..size];
        if data[0..4] != arch.magic() {
            return Err(Error::InvalidContainer(format!(
                "{}: bad magic {:02x?} for {:?}",
                name,
                &data[0..4],
                arch
            )));
        }

        let field = |at: usize| arch.read_u32([data[at], data[at + 1], data[at + 2], data[at + 3]]);

        let container = Container {
            name: name.to_string(),
            arch,
            version: field(4),
            system_flags: field(8),
            graphics_flags: field(12),
            payload: data[HEADER_SIZE..].to_vec(),
        };
        tracing::debug!(
            "unpacked {} (version {}, {} payload bytes)",
            container.name,
            container.version,
            container.payload.len()
        );
        Ok(container)
    }

    /// Read and unpack a script file, selecting the architecture from its name
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let arch = Arch::from_path(path)?;
        let data = std::fs::read(path).map_err(|e| Error::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let size = u32::try_from(data.len()).map_err(|_| {
            Error::InvalidContainer(format!("{}: larger than 4 GiB", path.display()))
        })?;
        let name = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
        Self::unpack(&data, &name, size, arch)
    }

    /// The located script region
    pub fn region(&self) -> &[u8] {
        &self.payload
    }
}
