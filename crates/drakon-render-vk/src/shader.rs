// SPDX-License-Identifier: CEPL-1.0
//! GLSL compilation through an external compiler and SPIR-V loading.

use anyhow::{ensure, Context, Result};
use ash::util::read_spv;
use std::{
    env,
    ffi::{OsStr, OsString},
    fs,
    io::Cursor,
    path::{Path, PathBuf},
    process::Command,
};
use tracing::debug;

/// Overrides the compiler executable.
pub const GLSLC_ENV: &str = "DRAKON_GLSLC";

/// `tri.vert` compiles to `tri.vert.spv` next to it.
pub fn spirv_path_for(source: &Path) -> PathBuf {
    let mut out = source.as_os_str().to_owned();
    out.push(".spv");
    PathBuf::from(out)
}

pub fn glslc_program() -> OsString {
    env::var_os(GLSLC_ENV)
        .filter(|p| !p.is_empty())
        .unwrap_or_else(|| OsString::from("glslc"))
}

/// Compiles `source` with `$DRAKON_GLSLC` (default `glslc`) and returns the
/// path of the SPIR-V file it wrote.
pub fn compile_glsl(source: &Path) -> Result<PathBuf> {
    compile_glsl_with(&glslc_program(), source)
}

pub fn compile_glsl_with(program: &OsStr, source: &Path) -> Result<PathBuf> {
    ensure!(!source.as_os_str().is_empty(), "no GLSL source file given");
    let out = spirv_path_for(source);
    let status = Command::new(program)
        .arg(source)
        .arg("-o")
        .arg(&out)
        .status()
        .with_context(|| format!("running {program:?} on {}", source.display()))?;
    ensure!(
        status.success(),
        "{program:?} failed on {} ({status})",
        source.display()
    );
    debug!("compiled {} -> {}", source.display(), out.display());
    Ok(out)
}

pub fn load_spirv(bytes: &[u8]) -> Result<Vec<u32>> {
    read_spv(&mut Cursor::new(bytes)).context("reading SPIR-V")
}

pub fn load_spirv_file(path: &Path) -> Result<Vec<u32>> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    load_spirv(&bytes).with_context(|| path.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spirv_lands_next_to_source() {
        assert_eq!(
            spirv_path_for(Path::new("shaders/tri.vert")),
            PathBuf::from("shaders/tri.vert.spv")
        );
    }

    #[test]
    fn empty_path_is_rejected() {
        let err = compile_glsl_with(OsStr::new("glslc"), Path::new("")).unwrap_err();
        assert!(err.to_string().contains("no GLSL source"));
    }

    #[test]
    fn missing_compiler_is_an_error() {
        let err = compile_glsl_with(
            OsStr::new("drakon-no-such-compiler"),
            Path::new("tri.vert"),
        )
        .unwrap_err();
        assert!(err.to_string().contains("tri.vert"));
    }

    #[cfg(unix)]
    #[test]
    fn exit_status_decides_success() {
        let src = Path::new("tri.frag");
        assert_eq!(
            compile_glsl_with(OsStr::new("true"), src).unwrap(),
            PathBuf::from("tri.frag.spv")
        );
        assert!(compile_glsl_with(OsStr::new("false"), src).is_err());
    }

    #[test]
    fn spirv_words_are_read() {
        let magic = 0x0723_0203u32.to_le_bytes();
        let mut bytes = magic.to_vec();
        bytes.extend_from_slice(&[0, 0, 1, 0]);
        assert_eq!(load_spirv(&bytes).unwrap().len(), 2);
        assert!(load_spirv(&bytes[..3]).is_err());
    }
}
