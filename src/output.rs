// 该文件是 Guanshan （关山） 项目的一部分。
// src/output.rs - 输出模块
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

mod visualizer;

#[cfg(feature = "directory_record")]
mod directory_record;
#[cfg(feature = "gstreamer_output")]
mod gstreamer_output;

use anyhow::Result;
use image::RgbImage;

use crate::model::Detection;

pub use visualizer::{Visualizer, VisualizerError, label_top};

#[cfg(feature = "directory_record")]
pub use directory_record::{DirectoryRecordOutput, DirectoryRecordOutputError, RecordKind};
#[cfg(feature = "gstreamer_output")]
pub use gstreamer_output::{GstDisplay, GstOutputError, GstVideoWriter, GstVideoWriterBuilder};

/// 输出写入器 trait
///
/// 图像送进来时已经画好标注；检测列表只给需要旁路记录的写入器用。
pub trait OutputWriter {
  /// 写入一帧
  fn write_frame(&mut self, image: &RgbImage, detections: &[Detection]) -> Result<()>;

  /// 完成写入，所有退出路径上恰好调用一次
  fn finish(&mut self) -> Result<()>;
}

/// 按键事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEvent {
  Esc,
  Char(char),
}

/// 显示表面 trait
///
/// 视频循环每帧送显一次并轮询一次按键，方便在没有真实窗口的
/// 环境下用假实现测试。
pub trait Display {
  fn show(&mut self, image: &RgbImage) -> Result<()>;

  fn poll_key(&mut self) -> Option<KeyEvent>;
}

/// 无显示输出
pub struct NullDisplay;

impl Display for NullDisplay {
  fn show(&mut self, _image: &RgbImage) -> Result<()> {
    Ok(())
  }

  fn poll_key(&mut self) -> Option<KeyEvent> {
    None
  }
}
