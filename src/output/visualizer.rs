// 该文件是 Guanshan （关山） 项目的一部分。
// src/output/visualizer.rs - 检测结果可视化
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

use std::cell::Cell;
use std::path::Path;

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use thiserror::Error;
use tracing::warn;

use crate::labels::ClassList;
use crate::model::Detection;

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_HEIGHT: i32 = 24;
const LABEL_CHAR_WIDTH: f32 = 11.0; // 每字符平均宽度（粗略估计）
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);
const OVERLAY_BACKGROUND: Rgb<u8> = Rgb([0, 0, 0]);

/// 标签顶边位置：至少离图像上沿一个标签高度，防止画出画布。
pub fn label_top(box_y: i32, label_height: i32) -> i32 {
  box_y.max(label_height)
}

#[derive(Error, Debug)]
pub enum VisualizerError {
  #[error("无法读取字体文件 {path}: {source}")]
  FontRead {
    path: String,
    source: std::io::Error,
  },
  #[error("字体文件 {0} 无效")]
  FontInvalid(String),
}

/// 可视化工具
///
/// 没有字体时仍然画框，只是标签文本缺席（首次缺席时告警一次）。
#[derive(Debug)]
pub struct Visualizer {
  /// 字体
  font: Option<FontArc>,
  /// 字体大小
  font_scale: PxScale,
  /// 边界框颜色映射
  colors: Vec<Rgb<u8>>,
  font_warned: Cell<bool>,
}

impl Default for Visualizer {
  fn default() -> Self {
    Self::new()
  }
}

impl Visualizer {
  /// 创建不带字体的可视化工具。
  pub fn new() -> Self {
    // 生成 80 种不同的颜色（对应 COCO 数据集的 80 个类别）
    let colors: Vec<Rgb<u8>> = (0..80)
      .map(|i| {
        let hue = (i as f32 / 80.0) * 360.0;
        Self::hsv_to_rgb(hue, 0.8, 0.9)
      })
      .collect();

    Visualizer {
      font: None,
      font_scale: PxScale::from(LABEL_FONT_SIZE),
      colors,
      font_warned: Cell::new(false),
    }
  }

  /// 从字体文件创建可视化工具。
  pub fn from_font_file(path: impl AsRef<Path>) -> Result<Self, VisualizerError> {
    let path = path.as_ref();
    let data = std::fs::read(path).map_err(|source| VisualizerError::FontRead {
      path: path.display().to_string(),
      source,
    })?;
    let font = FontArc::try_from_vec(data)
      .map_err(|_| VisualizerError::FontInvalid(path.display().to_string()))?;

    let mut visualizer = Self::new();
    visualizer.font = Some(font);
    Ok(visualizer)
  }

  /// HSV 转 RGB
  fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
    let c = v * s;
    let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
    let m = v - c;

    let (r, g, b) = if h < 60.0 {
      (c, x, 0.0)
    } else if h < 120.0 {
      (x, c, 0.0)
    } else if h < 180.0 {
      (0.0, c, x)
    } else if h < 240.0 {
      (0.0, x, c)
    } else if h < 300.0 {
      (x, 0.0, c)
    } else {
      (c, 0.0, x)
    };

    Rgb([
      ((r + m) * 255.0) as u8,
      ((g + m) * 255.0) as u8,
      ((b + m) * 255.0) as u8,
    ])
  }

  fn class_color(&self, class_id: usize) -> Rgb<u8> {
    self.colors[class_id % self.colors.len()]
  }

  /// 绘制边界框（两层空心矩形加粗到 2 像素）。
  fn draw_box(&self, image: &mut RgbImage, detection: &Detection, color: Rgb<u8>) {
    let x = detection.x.max(0.0) as i32;
    let y = detection.y.max(0.0) as i32;
    let width = detection.width.min(image.width() as f32 - detection.x) as u32;
    let height = detection.height.min(image.height() as f32 - detection.y) as u32;

    if width == 0 || height == 0 {
      return;
    }

    let rect = Rect::at(x, y).of_size(width, height);
    draw_hollow_rect_mut(image, rect, color);

    if width > 2 && height > 2 {
      let inner =
        Rect::at(x + 1, y + 1).of_size(width.saturating_sub(2), height.saturating_sub(2));
      draw_hollow_rect_mut(image, inner, color);
    }
  }

  /// 在框上方绘制标签底色和文本。
  fn draw_label(&self, image: &mut RgbImage, detection: &Detection, text: &str, color: Rgb<u8>) {
    // 估算文本大小（粗略估计）
    let text_width = (text.len() as f32 * LABEL_CHAR_WIDTH) as i32;
    let text_height = LABEL_TEXT_HEIGHT;

    let label_x = (detection.x.max(0.0) as i32).min(image.width() as i32 - 1);
    let top = label_top(detection.y as i32, text_height);

    // 确保标签不超出图像右缘
    let max_width = (image.width() as i32 - label_x).max(0);
    let label_width = text_width.min(max_width) as u32;
    let label_height = text_height as u32;

    if label_width == 0 || label_height == 0 {
      return;
    }

    let rect = Rect::at(label_x, top - text_height).of_size(label_width, label_height);
    draw_filled_rect_mut(image, rect, color);

    match &self.font {
      Some(font) => {
        draw_text_mut(
          image,
          TEXT_COLOR,
          label_x,
          top - text_height + LABEL_TEXT_VERTICAL_PADDING,
          self.font_scale,
          font,
          text,
        );
      }
      None => {
        if !self.font_warned.get() {
          warn!("未加载字体，标签文本不会渲染");
          self.font_warned.set(true);
        }
      }
    }
  }

  /// 标注单个检测：边界框加 `"<类别名> <置信度>"` 标签。
  pub fn draw_best(&self, image: &mut RgbImage, detection: &Detection, classes: &ClassList) {
    let color = self.class_color(detection.class_id);
    self.draw_box(image, detection, color);

    let label = format!(
      "{} {:.2}",
      classes.label_for(detection.class_id),
      detection.confidence
    );
    self.draw_label(image, detection, &label, color);
  }

  /// 标注一组检测结果。
  pub fn draw_detections(&self, image: &mut RgbImage, detections: &[Detection], classes: &ClassList) {
    for detection in detections {
      self.draw_best(image, detection, classes);
    }
  }

  /// 左上角状态叠加（帧号、推理耗时等）。
  pub fn overlay_status(&self, image: &mut RgbImage, text: &str) {
    let text_width = ((text.len() as f32 * LABEL_CHAR_WIDTH) as i32)
      .min(image.width() as i32)
      .max(0);
    if text_width == 0 {
      return;
    }

    let rect = Rect::at(0, 0).of_size(text_width as u32, LABEL_TEXT_HEIGHT as u32);
    draw_filled_rect_mut(image, rect, OVERLAY_BACKGROUND);

    if let Some(font) = &self.font {
      draw_text_mut(
        image,
        TEXT_COLOR,
        0,
        LABEL_TEXT_VERTICAL_PADDING,
        self.font_scale,
        font,
        text,
      );
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn det(x: f32, y: f32) -> Detection {
    Detection {
      x,
      y,
      width: 20.0,
      height: 16.0,
      confidence: 0.8,
      class_id: 0,
    }
  }

  #[test]
  fn label_top_clamps_to_label_height() {
    // 框贴着上沿时标签顶边等于标签高度，而不是原始 y
    assert_eq!(label_top(3, LABEL_TEXT_HEIGHT), LABEL_TEXT_HEIGHT);
    assert_eq!(label_top(0, LABEL_TEXT_HEIGHT), LABEL_TEXT_HEIGHT);
  }

  #[test]
  fn label_top_keeps_lower_positions() {
    assert_eq!(label_top(100, LABEL_TEXT_HEIGHT), 100);
  }

  #[test]
  fn draw_best_marks_pixels() {
    let visualizer = Visualizer::new();
    let mut image = RgbImage::new(64, 64);
    let classes = ClassList::from_names(vec!["rat".into()]);

    visualizer.draw_best(&mut image, &det(10.0, 30.0), &classes);

    let untouched = RgbImage::new(64, 64);
    assert_ne!(image.as_raw(), untouched.as_raw());
  }

  #[test]
  fn draw_best_near_top_edge_does_not_panic() {
    let visualizer = Visualizer::new();
    let mut image = RgbImage::new(64, 64);
    let classes = ClassList::from_names(vec!["rat".into()]);

    // y 小于标签高度，标签被压回画布内
    visualizer.draw_best(&mut image, &det(2.0, 1.0), &classes);
  }

  #[test]
  fn draw_detections_handles_out_of_range_class() {
    let visualizer = Visualizer::new();
    let mut image = RgbImage::new(64, 64);
    let classes = ClassList::from_names(vec!["rat".into()]);

    let mut detection = det(5.0, 20.0);
    detection.class_id = 42; // 类别表只有 1 项，回落到 unknown
    visualizer.draw_detections(&mut image, &[detection], &classes);
  }

  #[test]
  fn overlay_status_fills_top_left() {
    let visualizer = Visualizer::new();
    let mut image = RgbImage::from_pixel(64, 64, Rgb([200, 200, 200]));
    visualizer.overlay_status(&mut image, "frame 1");
    assert_eq!(*image.get_pixel(0, 0), OVERLAY_BACKGROUND);
  }

  #[test]
  fn from_font_file_reports_missing_file() {
    let err = Visualizer::from_font_file("/nonexistent/guanshan/font.ttf").unwrap_err();
    assert!(matches!(err, VisualizerError::FontRead { .. }));
  }

  #[test]
  fn from_font_file_rejects_invalid_data() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.ttf");
    std::fs::write(&path, b"definitely not a font").unwrap();
    assert!(matches!(
      Visualizer::from_font_file(&path),
      Err(VisualizerError::FontInvalid(_))
    ));
  }
}
