// Shader module loading
//
// Shaders arrive as pre-compiled SPIR-V files. They are read once at
// startup and kept as words, so every rebuild can create fresh modules
// without going back to disk. The bytecode itself is not validated.

use ash::vk;
use std::io::{self, Cursor};
use std::path::Path;

use crate::error::{EngineError, EngineResult, VkResultExt};

/// Vertex and fragment SPIR-V, already word-aligned
#[derive(Clone, Debug)]
pub struct ShaderBlobs {
    pub vertex: Vec<u32>,
    pub fragment: Vec<u32>,
}

impl ShaderBlobs {
    pub fn load(vertex: &Path, fragment: &Path) -> EngineResult<Self> {
        let blobs = Self {
            vertex: read_spirv(vertex)?,
            fragment: read_spirv(fragment)?,
        };
        log::info!(
            "Loaded shaders {:?} ({} words) and {:?} ({} words)",
            vertex,
            blobs.vertex.len(),
            fragment,
            blobs.fragment.len()
        );
        Ok(blobs)
    }
}

/// Read a whole SPIR-V file. Fails on empty files and on lengths that are
/// not a multiple of four bytes.
pub fn read_spirv(path: &Path) -> EngineResult<Vec<u32>> {
    let shader_error = |source| EngineError::ShaderRead {
        path: path.to_path_buf(),
        source,
    };

    let bytes = std::fs::read(path).map_err(shader_error)?;
    if bytes.is_empty() {
        return Err(shader_error(io::Error::new(
            io::ErrorKind::InvalidData,
            "shader file is empty",
        )));
    }

    ash::util::read_spv(&mut Cursor::new(bytes)).map_err(shader_error)
}

pub fn create_shader_module(device: &ash::Device, code: &[u32]) -> EngineResult<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::builder().code(code);

    unsafe { device.create_shader_module(&create_info, None) }.op("vkCreateShaderModule")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn file_with(bytes: &[u8]) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        file
    }

    #[test]
    fn reads_words_verbatim() {
        let magic = 0x0723_0203u32.to_le_bytes();
        let mut bytes = magic.to_vec();
        bytes.extend_from_slice(&[1, 0, 0, 0]);
        let file = file_with(&bytes);

        let words = read_spirv(file.path()).unwrap();
        assert_eq!(words, vec![0x0723_0203, 1]);
    }

    #[test]
    fn rejects_unaligned_length() {
        let file = file_with(&[3, 2, 35, 7, 0, 0, 0]);
        match read_spirv(file.path()) {
            Err(EngineError::ShaderRead { path, .. }) => assert_eq!(path, file.path()),
            other => panic!("expected ShaderRead, got {:?}", other),
        }
    }

    #[test]
    fn rejects_empty_file() {
        let file = file_with(&[]);
        assert!(matches!(
            read_spirv(file.path()),
            Err(EngineError::ShaderRead { .. })
        ));
    }

    #[test]
    fn missing_file_names_path() {
        let err = ShaderBlobs::load(Path::new("nope/vertex.spv"), Path::new("nope/fragment.spv"))
            .unwrap_err();
        assert!(err.to_string().contains("nope/vertex.spv"));
    }
}
