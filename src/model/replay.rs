// 该文件是 Guanshan （关山） 项目的一部分。
// src/model/replay.rs - 回放会话
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

//! # 回放会话
//!
//! 推理引擎在本仓库之外。演示程序用本模块把事先录好的检测结果
//! 按帧序回放出来，走完与真实引擎完全相同的驱动路径。
//!
//! 清单是一个 JSON 文件，`frames` 数组的第 i 项是第 i 次调用
//! 返回的检测列表：
//!
//! ```json
//! {
//!   "frames": [
//!     [ { "x": 10.0, "y": 20.0, "width": 64.0, "height": 48.0,
//!         "confidence": 0.91, "class_id": 0 } ],
//!     []
//!   ]
//! }
//! ```
//!
//! URL 形式为 `replay:///path/to/manifest.json`。

use image::RgbImage;
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  labels::ClassList,
  model::{Detection, Session, SessionConfig, SessionError},
};

#[derive(Deserialize)]
struct ReplayManifest {
  frames: Vec<Vec<Detection>>,
}

pub struct ReplayBuilder {
  manifest_path: String,
  config: SessionConfig,
}

impl FromUrlWithScheme for ReplayBuilder {
  const SCHEME: &'static str = "replay";
}

impl FromUrl for ReplayBuilder {
  type Error = SessionError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(SessionError::ModelPath(format!(
        "模型路径必须使用 {} 方案, 实际为 {}",
        Self::SCHEME,
        url.scheme()
      )));
    }

    Ok(ReplayBuilder {
      manifest_path: url.path().to_string(),
      config: SessionConfig::default(),
    })
  }
}

impl ReplayBuilder {
  pub fn config(mut self, config: SessionConfig) -> Self {
    self.config = config;
    self
  }

  pub fn build(self) -> Result<ReplaySession, SessionError> {
    info!("加载回放清单: {}", self.manifest_path);
    let data = std::fs::read(&self.manifest_path).map_err(|source| SessionError::Open {
      path: self.manifest_path.clone(),
      source,
    })?;

    let manifest: ReplayManifest = serde_json::from_slice(&data)?;
    info!(
      "回放清单加载完成: {} 帧, 变体 {:?}, 输入尺寸 {}x{}",
      manifest.frames.len(),
      self.config.variant,
      self.config.input_size.0,
      self.config.input_size.1
    );
    if self.config.accelerate {
      debug!("回放会话忽略硬件加速开关");
    }

    Ok(ReplaySession {
      frames: manifest.frames,
      cursor: 0,
      classes: ClassList::default(),
      confidence_threshold: self.config.confidence_threshold,
    })
  }
}

/// 按帧序回放检测结果的会话
#[derive(Debug)]
pub struct ReplaySession {
  frames: Vec<Vec<Detection>>,
  cursor: usize,
  classes: ClassList,
  confidence_threshold: f32,
}

impl ReplaySession {
  /// 直接从帧序列构建，测试与演示用。
  pub fn from_frames(frames: Vec<Vec<Detection>>) -> Self {
    ReplaySession {
      frames,
      cursor: 0,
      classes: ClassList::default(),
      confidence_threshold: 0.0,
    }
  }
}

impl Session for ReplaySession {
  fn classes(&self) -> &ClassList {
    &self.classes
  }

  fn set_classes(&mut self, classes: ClassList) {
    self.classes = classes;
  }

  fn run(&mut self, _image: &RgbImage) -> Result<Vec<Detection>, SessionError> {
    // 超出清单长度后回放空结果，正常结束而不是报错
    let mut detections = match self.frames.get(self.cursor) {
      Some(frame) => frame.clone(),
      None => Vec::new(),
    };
    self.cursor += 1;

    detections.retain(|det| det.confidence >= self.confidence_threshold);
    debug!("回放第 {} 帧: {} 个检测", self.cursor, detections.len());

    Ok(detections)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn det(confidence: f32) -> Detection {
    Detection {
      x: 0.0,
      y: 0.0,
      width: 8.0,
      height: 8.0,
      confidence,
      class_id: 0,
    }
  }

  #[test]
  fn replays_frames_in_order_then_empties() {
    let mut session = ReplaySession::from_frames(vec![vec![det(0.9)], vec![]]);
    let image = RgbImage::new(4, 4);

    assert_eq!(session.run(&image).unwrap().len(), 1);
    assert_eq!(session.run(&image).unwrap().len(), 0);
    // 清单耗尽后继续返回空
    assert_eq!(session.run(&image).unwrap().len(), 0);
  }

  #[test]
  fn builder_applies_confidence_threshold() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("manifest.json");
    std::fs::write(
      &path,
      r#"{"frames": [[
        {"x": 0.0, "y": 0.0, "width": 4.0, "height": 4.0, "confidence": 0.9, "class_id": 0},
        {"x": 0.0, "y": 0.0, "width": 4.0, "height": 4.0, "confidence": 0.1, "class_id": 1}
      ]]}"#,
    )
    .unwrap();

    let url = Url::parse(&format!("replay://{}", path.display())).unwrap();
    let config = SessionConfig {
      confidence_threshold: 0.5,
      ..SessionConfig::default()
    };
    let mut session = ReplayBuilder::from_url(&url).unwrap().config(config).build().unwrap();

    let detections = session.run(&RgbImage::new(4, 4)).unwrap();
    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0].class_id, 0);
  }

  #[test]
  fn builder_rejects_wrong_scheme() {
    let url = Url::parse("file:///tmp/manifest.json").unwrap();
    assert!(matches!(
      ReplayBuilder::from_url(&url),
      Err(SessionError::ModelPath(_))
    ));
  }

  #[test]
  fn build_fails_on_missing_manifest() {
    let url = Url::parse("replay:///nonexistent/guanshan/manifest.json").unwrap();
    let err = ReplayBuilder::from_url(&url).unwrap().build().unwrap_err();
    assert!(matches!(err, SessionError::Open { .. }));
  }
}
