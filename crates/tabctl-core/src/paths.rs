use std::{
    io,
    path::{Path, PathBuf},
};

pub const SOCKET_ENV: &str = "TABCTL_SOCKET";
pub const AUTH_FILE_ENV: &str = "TABCTL_AUTH_FILE";

/// `$XDG_RUNTIME_DIR/tabctl/focus.sock`, or the same under the temp dir when
/// no runtime dir is available.
pub fn default_socket_path() -> PathBuf {
    dirs::runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("tabctl")
        .join("focus.sock")
}

/// Reads the shared trigger secret. Surrounding whitespace is ignored and an
/// empty file is rejected.
pub fn load_auth_token(path: &Path) -> io::Result<String> {
    let token = std::fs::read_to_string(path)?.trim().to_string();
    if token.is_empty() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("auth file {} is empty", path.display()),
        ));
    }
    Ok(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn socket_lives_in_tabctl_dir() {
        let path = default_socket_path();
        assert!(path.ends_with("tabctl/focus.sock"));
    }

    #[test]
    fn auth_token_is_trimmed_and_required() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "  s3cret  ").expect("write");
        assert_eq!(load_auth_token(file.path()).expect("token"), "s3cret");

        let empty = tempfile::NamedTempFile::new().expect("temp file");
        let err = load_auth_token(empty.path()).expect_err("empty");
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(load_auth_token(Path::new("/nonexistent/tabctl/token")).is_err());
    }
}
