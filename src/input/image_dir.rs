// 该文件是 Guanshan （关山） 项目的一部分。
// src/input/image_dir.rs - 图片目录输入
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::path::{Path, PathBuf};

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme};

#[derive(Error, Debug)]
pub enum ImageDirectoryError {
  #[error("URI 方案不匹配: 期望 '{expected}', 实际 '{actual}'")]
  SchemeMismatch { expected: String, actual: String },
  #[error("无法读取图片目录 {path}: {source}")]
  ReadDir {
    path: String,
    source: std::io::Error,
  },
}

/// 批处理模式的图片目录
///
/// 只挑出扩展名恰为 `.jpg` 或 `.png` 的条目（区分大小写，
/// `.jpeg`、`.JPG` 不算），其余一律忽略。
pub struct ImageDirectory {
  dir: PathBuf,
}

impl FromUrlWithScheme for ImageDirectory {
  const SCHEME: &'static str = "image-dir";
}

impl FromUrl for ImageDirectory {
  type Error = ImageDirectoryError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ImageDirectoryError::SchemeMismatch {
        expected: Self::SCHEME.to_string(),
        actual: url.scheme().to_string(),
      });
    }

    Ok(ImageDirectory {
      dir: PathBuf::from(url.path()),
    })
  }
}

fn is_supported(path: &Path) -> bool {
  matches!(
    path.extension().and_then(|ext| ext.to_str()),
    Some("jpg") | Some("png")
  )
}

impl ImageDirectory {
  pub fn new(dir: impl Into<PathBuf>) -> Self {
    ImageDirectory { dir: dir.into() }
  }

  pub fn path(&self) -> &Path {
    &self.dir
  }

  /// 列出目录中受支持的图片路径，按文件名排序保证处理顺序稳定。
  pub fn entries(&self) -> Result<Vec<PathBuf>, ImageDirectoryError> {
    let read_dir = std::fs::read_dir(&self.dir).map_err(|source| ImageDirectoryError::ReadDir {
      path: self.dir.display().to_string(),
      source,
    })?;

    let mut entries = Vec::new();
    for entry in read_dir {
      let entry = entry.map_err(|source| ImageDirectoryError::ReadDir {
        path: self.dir.display().to_string(),
        source,
      })?;
      let path = entry.path();
      if is_supported(&path) {
        entries.push(path);
      } else {
        debug!("跳过不支持的条目: {}", path.display());
      }
    }

    entries.sort();
    Ok(entries)
  }
}

/// 加载一张图片并转为 RGB。
///
/// 解码失败由调用方决定是否跳过，批处理模式下这是唯一可恢复的错误。
pub fn read_rgb(path: &Path) -> Result<RgbImage, image::ImageError> {
  Ok(ImageReader::open(path)?.decode()?.to_rgb8())
}
