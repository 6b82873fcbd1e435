// 该文件是 Guanshan （关山） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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

//! # 目录记录输出
//!
//! 把标注好的帧按日期目录落盘，可选在旁边写一份 JSON 检测记录。
//!
//! URL 形式为 `folder:///path/to/out`，查询参数：
//!
//! - `record=name` 记录类别名，`record=id` 记录类别 ID
//! - `always` 没有检测时也写帧

use std::path::PathBuf;

use chrono::{Datelike, Utc};
use image::RgbImage;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;
use url::Url;

use super::OutputWriter;
use crate::{
  FromUrl, FromUrlWithScheme,
  labels::ClassList,
  model::Detection,
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("记录序列化错误: {0}")]
  RecordError(#[from] serde_json::Error),
}

/// 旁路记录的标签形式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
  /// 记录类别名
  Name,
  /// 记录类别 ID
  Id,
}

#[derive(Serialize)]
struct RecordItem {
  label: String,
  confidence: f32,
  #[serde(rename = "box")]
  bbox: [f32; 4],
}

pub struct DirectoryRecordOutput {
  directory: PathBuf,
  record: Option<RecordKind>,
  classes: ClassList,
  always: bool,
  frame_counter: u16,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let record = uri.query_pairs().find_map(|(k, v)| {
      if k == "record" {
        if v == "id" {
          Some(RecordKind::Id)
        } else {
          Some(RecordKind::Name)
        }
      } else {
        None
      }
    });

    let always = uri.query_pairs().any(|(k, _)| k == "always");

    Ok(DirectoryRecordOutput {
      directory: PathBuf::from(uri.path()),
      record,
      classes: ClassList::default(),
      always,
      frame_counter: 0,
    })
  }
}

impl DirectoryRecordOutput {
  pub fn new(directory: impl Into<PathBuf>) -> Self {
    DirectoryRecordOutput {
      directory: directory.into(),
      record: None,
      classes: ClassList::default(),
      always: false,
      frame_counter: 0,
    }
  }

  pub fn with_record(mut self, kind: RecordKind) -> Self {
    self.record = Some(kind);
    self
  }

  pub fn always(mut self, always: bool) -> Self {
    self.always = always;
    self
  }

  /// 记录类别名时需要的类别表。
  pub fn with_classes(mut self, classes: ClassList) -> Self {
    self.classes = classes;
    self
  }

  fn frame_id(&mut self) -> u16 {
    self.frame_counter = self.frame_counter.wrapping_add(1);
    self.frame_counter
  }

  fn frame_path(&mut self) -> Result<PathBuf, DirectoryRecordOutputError> {
    let now = Utc::now();
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    if !directory.exists() {
      std::fs::create_dir_all(&directory)?;
    }

    Ok(directory.join(format!(
      "{}-{:04X}.png",
      now.format("%H-%M-%S"),
      self.frame_id()
    )))
  }

  fn record_items(&self, detections: &[Detection]) -> Vec<RecordItem> {
    detections
      .iter()
      .map(|det| {
        let label = match self.record {
          Some(RecordKind::Id) | None => det.class_id.to_string(),
          Some(RecordKind::Name) => self.classes.label_for(det.class_id).to_string(),
        };
        RecordItem {
          label,
          confidence: det.confidence,
          bbox: [det.x, det.y, det.width, det.height],
        }
      })
      .collect()
  }

  fn save(
    &mut self,
    image: &RgbImage,
    detections: &[Detection],
  ) -> Result<(), DirectoryRecordOutputError> {
    if detections.is_empty() && !self.always {
      debug!("没有检测结果，跳过落盘");
      return Ok(());
    }

    let path = self.frame_path()?;
    image.save(&path)?;

    if self.record.is_some() {
      let items = self.record_items(detections);
      let json = serde_json::to_string_pretty(&items)?;
      std::fs::write(path.with_extension("json"), json)?;
    }

    debug!("帧已写入 {}", path.display());
    Ok(())
  }
}

impl OutputWriter for DirectoryRecordOutput {
  fn write_frame(&mut self, image: &RgbImage, detections: &[Detection]) -> anyhow::Result<()> {
    self.save(image, detections)?;
    Ok(())
  }

  fn finish(&mut self) -> anyhow::Result<()> {
    Ok(())
  }
}
