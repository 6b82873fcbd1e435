// 该文件是 Guanshan （关山） 项目的一部分。
// src/model.rs - 推理会话边界
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

use std::path::PathBuf;

use image::RgbImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::labels::ClassList;

/// 单个检测结果
///
/// 坐标为像素空间的左上角加宽高，`class_id` 是类别表下标，
/// `confidence` 取值 [0, 1]。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Detection {
  pub x: f32,
  pub y: f32,
  pub width: f32,
  pub height: f32,
  pub confidence: f32,
  pub class_id: usize,
}

/// 模型变体标记
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ModelVariant {
  #[default]
  DetectV8,
  DetectV8Half,
  Pose,
  Cls,
}

/// 会话创建参数
///
/// 启动时构建一次，之后不再修改。
#[derive(Debug, Clone)]
pub struct SessionConfig {
  pub model_path: PathBuf,
  pub input_size: (u32, u32),
  pub confidence_threshold: f32,
  pub iou_threshold: f32,
  pub accelerate: bool,
  pub variant: ModelVariant,
}

impl Default for SessionConfig {
  fn default() -> Self {
    SessionConfig {
      model_path: PathBuf::new(),
      input_size: (640, 640),
      confidence_threshold: 0.25,
      iou_threshold: 0.45,
      accelerate: false,
      variant: ModelVariant::DetectV8,
    }
  }
}

#[derive(Error, Debug)]
pub enum SessionError {
  #[error("无法打开模型文件 {path}: {source}")]
  Open {
    path: String,
    source: std::io::Error,
  },
  #[error("清单解析失败: {0}")]
  Manifest(#[from] serde_json::Error),
  #[error("模型路径错误: {0}")]
  ModelPath(String),
  #[error("推理失败: {0}")]
  Inference(String),
}

/// 推理会话
///
/// 真正的推理引擎在本仓库之外，这里只规定调用方需要的能力：
/// 会话持有类别表，每次 `run` 对一张 RGB 图像返回零个或多个检测。
pub trait Session {
  fn classes(&self) -> &ClassList;
  fn set_classes(&mut self, classes: ClassList);
  fn run(&mut self, image: &RgbImage) -> Result<Vec<Detection>, SessionError>;
}

/// 取置信度最高的检测，空输入返回 `None`。
///
/// 比较使用严格大于，并列时保留先出现的那个。
pub fn best_detection(detections: &[Detection]) -> Option<&Detection> {
  let mut best: Option<&Detection> = None;
  for det in detections {
    match best {
      Some(b) if det.confidence > b.confidence => best = Some(det),
      None => best = Some(det),
      _ => {}
    }
  }
  best
}

#[cfg(feature = "session_replay")]
mod replay;
#[cfg(feature = "session_replay")]
pub use self::replay::{ReplayBuilder, ReplaySession};

#[cfg(test)]
mod tests {
  use super::*;

  fn det(confidence: f32, class_id: usize) -> Detection {
    Detection {
      x: 1.0,
      y: 2.0,
      width: 10.0,
      height: 20.0,
      confidence,
      class_id,
    }
  }

  #[test]
  fn best_detection_of_empty_is_none() {
    assert!(best_detection(&[]).is_none());
  }

  #[test]
  fn best_detection_picks_strict_maximum() {
    let dets = [det(0.3, 0), det(0.9, 1), det(0.5, 2)];
    let best = best_detection(&dets).unwrap();
    assert_eq!(best.class_id, 1);
  }

  #[test]
  fn best_detection_tie_keeps_first_occurrence() {
    let dets = [det(0.4, 0), det(0.7, 1), det(0.7, 2), det(0.2, 3)];
    let best = best_detection(&dets).unwrap();
    assert_eq!(best.class_id, 1);
  }

  #[test]
  fn session_config_defaults() {
    let config = SessionConfig::default();
    assert_eq!(config.input_size, (640, 640));
    assert_eq!(config.variant, ModelVariant::DetectV8);
    assert!(!config.accelerate);
  }
}
