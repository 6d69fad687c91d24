//! 内容哈希
//!
//! 流式计算完整内容的 SHA-256，只在时间戳比较之后作为内容是否
//! 真正不同的最终判据，不做任何局部采样。

use anyhow::Result;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;
use tokio::io::AsyncReadExt;

const CHUNK_SIZE: usize = 64 * 1024;

/// 流式计算文件的 SHA-256，返回小写十六进制
pub async fn hash_file(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];

    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// 同步版本，供 spawn_blocking 里的 FTP 会话使用
pub fn hash_file_blocking(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; CHUNK_SIZE];

    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// 计算内存数据的 SHA-256（远端下载内容已在内存时使用）
pub fn hash_bytes(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_bytes_known_vectors() {
        assert_eq!(
            hash_bytes(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            hash_bytes(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn test_hash_file_matches_hash_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        let content = vec![0xabu8; CHUNK_SIZE * 2 + 17];
        std::fs::write(&path, &content).unwrap();

        assert_eq!(hash_file(&path).await.unwrap(), hash_bytes(&content));
        assert_eq!(hash_file_blocking(&path).unwrap(), hash_bytes(&content));
    }
}
