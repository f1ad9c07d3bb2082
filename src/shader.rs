//! Fallout 3 shader packages (`shaderpackageNNN.sdp`). A package is a flat
//! record container: a 12-byte header (type tag, shader count, total payload
//! size), then per shader a 0x100-byte NUL-padded name, a length, and the
//! compiled blob. Edits rewrite the whole file since records are contiguous.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};
use thiserror::Error;

const NAME_LEN: usize = 0x100;
const HEADER_LEN: usize = 12;

#[derive(Debug, Error)]
pub enum ShaderError {
    #[error("shader package not found: {0}")]
    PackageNotFound(PathBuf),
    #[error("shader {0} is not present in the package")]
    UnknownShader(String),
    #[error("malformed shader package: {0}")]
    Malformed(&'static str),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct SdpEntry {
    pub name: String,
    pub data: Vec<u8>,
}

#[derive(Debug)]
pub struct SdpArchive {
    path: PathBuf,
    type_tag: u32,
    entries: Vec<SdpEntry>,
}

impl SdpArchive {
    pub fn open(path: &Path) -> Result<Self, ShaderError> {
        if !path.exists() {
            return Err(ShaderError::PackageNotFound(path.to_path_buf()));
        }
        let raw = fs::read(path)?;
        let (type_tag, entries) = parse(&raw)?;
        Ok(Self {
            path: path.to_path_buf(),
            type_tag,
            entries,
        })
    }

    pub fn create(path: &Path, type_tag: u32, entries: Vec<SdpEntry>) -> Result<Self, ShaderError> {
        let archive = Self {
            path: path.to_path_buf(),
            type_tag,
            entries,
        };
        archive.write_out()?;
        Ok(archive)
    }

    pub fn shader_names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|entry| entry.name.as_str())
    }

    pub fn shader_data(&self, name: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .find(|entry| entry.name.eq_ignore_ascii_case(name))
            .map(|entry| entry.data.as_slice())
    }

    /// Replaces a shader's blob, persists the package, and returns the bytes
    /// that were live before the edit.
    pub fn edit_shader(&mut self, name: &str, data: &[u8]) -> Result<Vec<u8>, ShaderError> {
        let entry = self
            .entries
            .iter_mut()
            .find(|entry| entry.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| ShaderError::UnknownShader(name.to_string()))?;
        let previous = std::mem::replace(&mut entry.data, data.to_vec());
        self.write_out()?;
        Ok(previous)
    }

    fn write_out(&self) -> Result<(), ShaderError> {
        let payload: usize = self
            .entries
            .iter()
            .map(|entry| NAME_LEN + 4 + entry.data.len())
            .sum();
        let mut out = Vec::with_capacity(HEADER_LEN + payload);
        out.extend_from_slice(&self.type_tag.to_le_bytes());
        out.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        out.extend_from_slice(&(payload as u32).to_le_bytes());
        for entry in &self.entries {
            let mut name = [0u8; NAME_LEN];
            let bytes = entry.name.as_bytes();
            let len = bytes.len().min(NAME_LEN);
            name[..len].copy_from_slice(&bytes[..len]);
            out.extend_from_slice(&name);
            out.extend_from_slice(&(entry.data.len() as u32).to_le_bytes());
            out.extend_from_slice(&entry.data);
        }
        let mut file = fs::File::create(&self.path)?;
        file.write_all(&out)?;
        Ok(())
    }
}

fn parse(raw: &[u8]) -> Result<(u32, Vec<SdpEntry>), ShaderError> {
    if raw.len() < HEADER_LEN {
        return Err(ShaderError::Malformed("truncated header"));
    }
    let type_tag = read_u32(raw, 0);
    let count = read_u32(raw, 4) as usize;
    // Each entry needs at least a name block and a length word, so a count
    // bigger than the remaining bytes can hold is bogus before we allocate.
    if count > (raw.len() - HEADER_LEN) / (NAME_LEN + 4) {
        return Err(ShaderError::Malformed("entry count exceeds file size"));
    }
    let mut entries = Vec::with_capacity(count);
    let mut offset = HEADER_LEN;
    for _ in 0..count {
        if raw.len() < offset + NAME_LEN + 4 {
            return Err(ShaderError::Malformed("truncated shader record"));
        }
        let name_raw = &raw[offset..offset + NAME_LEN];
        let name_end = name_raw
            .iter()
            .position(|byte| *byte == 0)
            .unwrap_or(NAME_LEN);
        let name = String::from_utf8_lossy(&name_raw[..name_end]).to_string();
        offset += NAME_LEN;
        let size = read_u32(raw, offset) as usize;
        offset += 4;
        if raw.len() < offset + size {
            return Err(ShaderError::Malformed("shader blob runs past the file"));
        }
        entries.push(SdpEntry {
            name,
            data: raw[offset..offset + size].to_vec(),
        });
        offset += size;
    }
    Ok((type_tag, entries))
}

fn read_u32(raw: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([raw[offset], raw[offset + 1], raw[offset + 2], raw[offset + 3]])
}

/// Packages live in Data/Shaders and are numbered with three digits.
pub fn package_path(plugins_dir: &Path, package: u32) -> PathBuf {
    plugins_dir
        .join("Shaders")
        .join(format!("shaderpackage{package:03}.sdp"))
}

/// Composite install-log key for a shader edit.
pub fn shader_key(package: u32, name: &str) -> String {
    format!("sdp:{package}/{name}")
}
