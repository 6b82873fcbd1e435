// 该文件是 Guanshan （关山） 项目的一部分。
// src/output/gstreamer_output.rs - GStreamer 视频输出与显示
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

//! # GStreamer 视频输出模块
//!
//! 把标注好的帧编码成 MJPEG/AVI 文件（与原始演示使用的 FourCC
//! 一致），另提供一个送显到 `autovideosink` 的窗口。
//!
//! URL 形式为 `video-file:///path/to/output.avi?fps=30`。

use anyhow::Result;
use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use image::RgbImage;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use super::{Display, KeyEvent, OutputWriter};
use crate::model::Detection;
use crate::{FromUrl, FromUrlWithScheme};

/// 帧率非法时的缺省值
const DEFAULT_FPS: f64 = 30.0;

#[derive(Error, Debug)]
pub enum GstOutputError {
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  #[error("Failed to get appsrc element")]
  AppSrcNotFound,
  #[error("Failed to convert element to appsrc")]
  AppSrcConversionFailed,
  #[error("Pipeline error: {0}")]
  PipelineError(String),
  #[error("Buffer creation error")]
  BufferCreationError,
  #[error("帧尺寸不匹配: 期望 {expected_width}x{expected_height}, 实际 {width}x{height}")]
  FrameSizeMismatch {
    expected_width: u32,
    expected_height: u32,
    width: u32,
    height: u32,
  },
}

fn make_appsrc_pipeline(
  pipeline_desc: &str,
  width: u32,
  height: u32,
  fps: i32,
) -> Result<(gst::Pipeline, gst_app::AppSrc), GstOutputError> {
  gst::init()?;

  let pipeline = gst::parse::launch(pipeline_desc)?
    .downcast::<gst::Pipeline>()
    .map_err(|_| GstOutputError::PipelineError("Failed to create pipeline".to_string()))?;

  let appsrc = pipeline
    .by_name("src")
    .ok_or(GstOutputError::AppSrcNotFound)?
    .downcast::<gst_app::AppSrc>()
    .map_err(|_| GstOutputError::AppSrcConversionFailed)?;

  let caps = gst::Caps::builder("video/x-raw")
    .field("format", "RGB")
    .field("width", width as i32)
    .field("height", height as i32)
    .field("framerate", gst::Fraction::new(fps, 1))
    .build();
  appsrc.set_caps(Some(&caps));
  appsrc.set_format(gst::Format::Time);

  pipeline.set_state(gst::State::Playing)?;

  Ok((pipeline, appsrc))
}

fn push_rgb_frame(
  appsrc: &gst_app::AppSrc,
  image: &RgbImage,
  frame_index: u64,
  fps: i32,
) -> Result<(), GstOutputError> {
  let data = image.as_raw();
  let mut buffer =
    gst::Buffer::with_size(data.len()).map_err(|_| GstOutputError::BufferCreationError)?;

  {
    let buffer_ref = buffer.get_mut().unwrap();
    let mut buffer_map = buffer_ref
      .map_writable()
      .map_err(|_| GstOutputError::PipelineError("Failed to map buffer".to_string()))?;
    buffer_map.copy_from_slice(data);
  }

  {
    let buffer_ref = buffer.get_mut().unwrap();
    let timestamp = frame_index * 1_000_000_000 / (fps as u64);
    buffer_ref.set_pts(gst::ClockTime::from_nseconds(timestamp));
    buffer_ref.set_duration(gst::ClockTime::from_nseconds(1_000_000_000 / fps as u64));
  }

  appsrc
    .push_buffer(buffer)
    .map_err(|e| GstOutputError::PipelineError(format!("Failed to push buffer: {:?}", e)))?;

  Ok(())
}

pub struct GstVideoWriterBuilder {
  path: String,
  width: u32,
  height: u32,
  fps: f64,
}

impl FromUrlWithScheme for GstVideoWriterBuilder {
  const SCHEME: &'static str = "video-file";
}

impl FromUrl for GstVideoWriterBuilder {
  type Error = GstOutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(GstOutputError::SchemeMismatch);
    }

    let fps = url
      .query_pairs()
      .find(|(k, _)| k == "fps")
      .and_then(|(_, v)| v.parse::<f64>().ok())
      .unwrap_or(0.0);

    Ok(GstVideoWriterBuilder {
      path: url.path().to_string(),
      width: 0,
      height: 0,
      fps,
    })
  }
}

impl GstVideoWriterBuilder {
  pub fn size(mut self, width: u32, height: u32) -> Self {
    self.width = width;
    self.height = height;
    self
  }

  /// 输入源报告的帧率；非正值在 `build` 时回落到缺省 30。
  pub fn fps(mut self, fps: f64) -> Self {
    if self.fps <= 0.0 {
      self.fps = fps;
    }
    self
  }

  pub fn build(self) -> Result<GstVideoWriter, GstOutputError> {
    let fps = if self.fps <= 0.0 {
      warn!("帧率非法 ({:.2})，使用缺省值 {}", self.fps, DEFAULT_FPS);
      DEFAULT_FPS
    } else {
      self.fps
    };
    let fps = fps.round() as i32;

    // 固定 MJPEG/AVI 封装，与原始演示的 FourCC 一致
    let pipeline_desc = format!(
      "appsrc name=src ! videoconvert ! jpegenc ! avimux ! filesink location={}",
      self.path
    );
    info!("GStreamer 输出管道: {}", pipeline_desc);

    let (pipeline, appsrc) = make_appsrc_pipeline(&pipeline_desc, self.width, self.height, fps)?;
    info!(
      "视频输出已创建: {}x{} @ {} fps -> {}",
      self.width, self.height, fps, self.path
    );

    Ok(GstVideoWriter {
      pipeline,
      appsrc,
      width: self.width,
      height: self.height,
      fps,
      frame_index: 0,
      finished: false,
    })
  }
}

/// GStreamer 视频文件写入器
pub struct GstVideoWriter {
  pipeline: gst::Pipeline,
  appsrc: gst_app::AppSrc,
  width: u32,
  height: u32,
  fps: i32,
  frame_index: u64,
  finished: bool,
}

impl GstVideoWriter {
  fn close(&mut self) -> Result<(), GstOutputError> {
    if self.finished {
      return Ok(());
    }
    self.finished = true;

    let _ = self.appsrc.end_of_stream();

    // 等待 EOS 落盘再关闭管道
    if let Some(bus) = self.pipeline.bus() {
      let _ = bus.timed_pop_filtered(
        gst::ClockTime::from_seconds(5),
        &[gst::MessageType::Eos, gst::MessageType::Error],
      );
    }
    self.pipeline.set_state(gst::State::Null)?;
    info!("视频输出已关闭，共写入 {} 帧", self.frame_index);
    Ok(())
  }
}

impl OutputWriter for GstVideoWriter {
  fn write_frame(&mut self, image: &RgbImage, _detections: &[Detection]) -> Result<()> {
    if image.width() != self.width || image.height() != self.height {
      return Err(
        GstOutputError::FrameSizeMismatch {
          expected_width: self.width,
          expected_height: self.height,
          width: image.width(),
          height: image.height(),
        }
        .into(),
      );
    }

    push_rgb_frame(&self.appsrc, image, self.frame_index, self.fps)?;
    self.frame_index += 1;
    Ok(())
  }

  fn finish(&mut self) -> Result<()> {
    self.close()?;
    Ok(())
  }
}

impl Drop for GstVideoWriter {
  fn drop(&mut self) {
    // finish 没被调用的异常路径兜底
    if !self.finished && let Err(e) = self.close() {
      warn!("关闭 GStreamer 输出管道失败: {}", e);
    }
  }
}

/// GStreamer 显示窗口
///
/// 窗口不投递键盘事件，取消依赖 Ctrl-C 的协作式取消；
/// `poll_key` 固定返回 `None`。
pub struct GstDisplay {
  pipeline: gst::Pipeline,
  appsrc: gst_app::AppSrc,
  fps: i32,
  frame_index: u64,
}

impl GstDisplay {
  pub fn create(width: u32, height: u32, fps: f64) -> Result<Self, GstOutputError> {
    let fps = if fps <= 0.0 { DEFAULT_FPS } else { fps }.round() as i32;

    let pipeline_desc = "appsrc name=src ! videoconvert ! autovideosink sync=false";
    info!("GStreamer 显示管道: {}", pipeline_desc);

    let (pipeline, appsrc) = make_appsrc_pipeline(pipeline_desc, width, height, fps)?;

    Ok(GstDisplay {
      pipeline,
      appsrc,
      fps,
      frame_index: 0,
    })
  }
}

impl Display for GstDisplay {
  fn show(&mut self, image: &RgbImage) -> Result<()> {
    push_rgb_frame(&self.appsrc, image, self.frame_index, self.fps)?;
    self.frame_index += 1;
    Ok(())
  }

  fn poll_key(&mut self) -> Option<KeyEvent> {
    None
  }
}

impl Drop for GstDisplay {
  fn drop(&mut self) {
    let _ = self.appsrc.end_of_stream();
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("停止 GStreamer 显示管道失败: {}", e);
    }
  }
}
