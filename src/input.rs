// 该文件是 Guanshan （关山） 项目的一部分。
// src/input.rs - 输入源模块
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

mod image_dir;
#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;

use anyhow::Result;
use image::RgbImage;

pub use image_dir::{ImageDirectory, ImageDirectoryError, read_rgb};

#[cfg(feature = "gstreamer_input")]
pub use gstreamer_input::{GstVideoSource, GstVideoSourceError};

/// 帧数据
pub struct Frame {
  /// RGB 图像数据
  pub image: RgbImage,
  /// 帧索引
  pub index: u64,
  /// 时间戳（毫秒）
  pub timestamp_ms: u64,
}

/// 视频类输入源 trait
///
/// 迭代结束（`None`）表示码流正常耗尽，不是错误。
pub trait InputSource: Iterator<Item = Result<Frame>> {
  /// 获取帧宽度
  fn width(&self) -> u32;

  /// 获取帧高度
  fn height(&self) -> u32;

  /// 获取帧率（如果适用）
  fn fps(&self) -> Option<f64>;
}
