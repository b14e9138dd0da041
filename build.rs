use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

const ENV_PREFIX: &[u8] = b"FEEDER_";
// Log-line tags that share the prefix but are not environment variables.
const NOT_ENV_KEYS: &[&str] = &["FEEDER_WARN"];

fn collect_rs_files(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_rs_files(&path, out)?;
        } else if path.extension().and_then(|ext| ext.to_str()) == Some("rs") {
            out.push(path);
        }
    }
    Ok(())
}

fn is_key_char(byte: u8) -> bool {
    byte.is_ascii_uppercase() || byte.is_ascii_digit() || byte == b'_'
}

fn collect_env_keys(source: &str, out: &mut BTreeSet<String>) {
    let bytes = source.as_bytes();
    let prefix = ENV_PREFIX.len();
    let mut i = 0usize;
    while i + prefix <= bytes.len() {
        let boundary = i == 0 || !is_key_char(bytes[i - 1]);
        if boundary && &bytes[i..i + prefix] == ENV_PREFIX {
            let mut j = i + prefix;
            while j < bytes.len() && is_key_char(bytes[j]) {
                j += 1;
            }
            if j > i + prefix {
                if let Some(key) = source.get(i..j)
                    && !NOT_ENV_KEYS.contains(&key)
                {
                    out.insert(key.to_string());
                }
                i = j;
                continue;
            }
        }
        i += 1;
    }
}

fn write_env_allowlist() -> std::io::Result<()> {
    let mut files = Vec::new();
    collect_rs_files(Path::new("src"), &mut files)?;

    let mut keys = BTreeSet::new();
    for file in files {
        if let Ok(content) = fs::read_to_string(&file) {
            collect_env_keys(&content, &mut keys);
        }
    }

    let out_dir = env::var("OUT_DIR").map_err(std::io::Error::other)?;
    let mut f = fs::File::create(Path::new(&out_dir).join("feeder_env_allowlist.rs"))?;
    writeln!(f, "pub const GENERATED_FEEDER_ENV_ALLOWLIST: &[&str] = &[")?;
    for key in keys {
        writeln!(f, "    \"{key}\",")?;
    }
    writeln!(f, "];")?;
    Ok(())
}

fn main() {
    if let Err(err) = write_env_allowlist() {
        panic!("failed to generate FEEDER_ env allowlist: {err}");
    }

    let now = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default();
    let build_id = format!("{:x}-{:x}", now.as_secs(), now.subsec_nanos());

    println!("cargo:rustc-env=BUILD_UUID={build_id}");
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=src");
}
