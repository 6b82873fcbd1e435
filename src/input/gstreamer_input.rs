// 该文件是 Guanshan （关山） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 视频输入
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

//! # GStreamer 视频输入模块
//!
//! 从视频文件解码 RGB 帧。需要系统安装 GStreamer 开发库：
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```
//!
//! URL 形式为 `video:///path/to/input.mp4`。

use anyhow::Result;
use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbImage;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use super::{Frame, InputSource};
use crate::{FromUrl, FromUrlWithScheme};

/// 帧率读不出来时的缺省值
const DEFAULT_FPS: f64 = 30.0;

#[derive(Error, Debug)]
pub enum GstVideoSourceError {
  #[error("URI scheme mismatch")]
  SchemeMismatch,
  #[error("GStreamer error: {0}")]
  GStreamerError(#[from] gst::glib::Error),
  #[error("GStreamer boolean error: {0}")]
  GStreamerBoolError(#[from] gst::glib::BoolError),
  #[error("State change error: {0}")]
  StateChangeError(#[from] gst::StateChangeError),
  #[error("Failed to get appsink element")]
  AppSinkNotFound,
  #[error("Failed to convert element to appsink")]
  AppSinkConversionFailed,
  #[error("Failed to get video info from caps")]
  VideoInfoError,
  #[error("Pipeline error: {0}")]
  PipelineError(String),
}

/// GStreamer 视频文件输入源
///
/// 解码管道固定输出 RGB，一帧一帧拉取；拉不到且到达 EOS 时
/// 迭代正常结束。
pub struct GstVideoSource {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  width: u32,
  height: u32,
  fps: f64,
  frame_index: u64,
  finished: bool,
}

impl FromUrlWithScheme for GstVideoSource {
  const SCHEME: &'static str = "video";
}

impl FromUrl for GstVideoSource {
  type Error = GstVideoSourceError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(GstVideoSourceError::SchemeMismatch);
    }
    Self::open(url.path())
  }
}

impl GstVideoSource {
  /// 打开视频文件。
  ///
  /// 管道或预卷失败即返回错误，本次运行不处理任何帧。
  pub fn open(path: &str) -> Result<Self, GstVideoSourceError> {
    gst::init()?;

    let pipeline_desc = format!(
      "filesrc location={} ! decodebin ! videoconvert ! video/x-raw,format=RGB \
       ! appsink name=sink max-buffers=4",
      path
    );
    info!("GStreamer 输入管道: {}", pipeline_desc);

    let pipeline = gst::parse::launch(&pipeline_desc)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| GstVideoSourceError::PipelineError("Failed to create pipeline".to_string()))?;

    let appsink = pipeline
      .by_name("sink")
      .ok_or(GstVideoSourceError::AppSinkNotFound)?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| GstVideoSourceError::AppSinkConversionFailed)?;

    // 预卷到第一帧，从 caps 读取宽高与帧率
    pipeline.set_state(gst::State::Paused)?;
    let preroll = appsink.pull_preroll().map_err(|_| {
      GstVideoSourceError::PipelineError(format!("无法打开视频文件: {}", path))
    })?;
    let caps = preroll
      .caps()
      .ok_or_else(|| GstVideoSourceError::PipelineError("No caps in sample".to_string()))?;
    let video_info =
      gst_video::VideoInfo::from_caps(caps).map_err(|_| GstVideoSourceError::VideoInfoError)?;

    let width = video_info.width();
    let height = video_info.height();
    let fps_fraction = video_info.fps();
    let fps = if fps_fraction.numer() <= 0 {
      warn!("无法读取帧率，使用缺省值 {}", DEFAULT_FPS);
      DEFAULT_FPS
    } else {
      fps_fraction.numer() as f64 / fps_fraction.denom() as f64
    };

    pipeline.set_state(gst::State::Playing)?;
    info!("视频输入已打开: {}x{} @ {:.2} fps", width, height, fps);

    Ok(GstVideoSource {
      pipeline,
      appsink,
      width,
      height,
      fps,
      frame_index: 0,
      finished: false,
    })
  }

  fn sample_to_image(&self, sample: &gst::Sample) -> Result<RgbImage, GstVideoSourceError> {
    let buffer = sample
      .buffer()
      .ok_or_else(|| GstVideoSourceError::PipelineError("No buffer in sample".to_string()))?;
    let caps = sample
      .caps()
      .ok_or_else(|| GstVideoSourceError::PipelineError("No caps in sample".to_string()))?;
    let video_info =
      gst_video::VideoInfo::from_caps(caps).map_err(|_| GstVideoSourceError::VideoInfoError)?;

    let width = video_info.width() as usize;
    let height = video_info.height() as usize;
    let stride = video_info.stride()[0] as usize;

    let map = buffer.map_readable().map_err(|e| {
      GstVideoSourceError::PipelineError(format!("Failed to map buffer for reading: {}", e))
    })?;
    let data = map.as_slice();

    // 行步长可能有对齐填充，逐行拷贝
    let mut image_data = Vec::with_capacity(width * height * 3);
    for y in 0..height {
      let row_start = y * stride;
      let row_end = row_start + width * 3;
      if row_end > data.len() {
        return Err(GstVideoSourceError::PipelineError(format!(
          "Buffer too small: expected at least {} bytes, got {}",
          row_end,
          data.len()
        )));
      }
      image_data.extend_from_slice(&data[row_start..row_end]);
    }

    RgbImage::from_raw(width as u32, height as u32, image_data)
      .ok_or_else(|| GstVideoSourceError::PipelineError("无法创建 RGB 图像".to_string()))
  }
}

impl Drop for GstVideoSource {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("停止 GStreamer 输入管道失败: {}", e);
    }
  }
}

impl Iterator for GstVideoSource {
  type Item = Result<Frame>;

  fn next(&mut self) -> Option<Self::Item> {
    if self.finished {
      return None;
    }

    if self.appsink.is_eos() {
      debug!("视频码流结束，共 {} 帧", self.frame_index);
      self.finished = true;
      return None;
    }

    let sample = match self.appsink.pull_sample() {
      Ok(sample) => sample,
      Err(_) if self.appsink.is_eos() => {
        debug!("视频码流结束，共 {} 帧", self.frame_index);
        self.finished = true;
        return None;
      }
      Err(e) => {
        self.finished = true;
        return Some(Err(
          GstVideoSourceError::PipelineError(format!("Failed to pull sample: {}", e)).into(),
        ));
      }
    };

    let image = match self.sample_to_image(&sample) {
      Ok(image) => image,
      Err(e) => {
        self.finished = true;
        return Some(Err(e.into()));
      }
    };

    let timestamp_ms = sample
      .buffer()
      .and_then(|b| b.pts())
      .map_or(0, |pts| pts.mseconds());

    let frame = Frame {
      image,
      index: self.frame_index,
      timestamp_ms,
    };
    self.frame_index += 1;
    Some(Ok(frame))
  }
}

impl InputSource for GstVideoSource {
  fn width(&self) -> u32 {
    self.width
  }

  fn height(&self) -> u32 {
    self.height
  }

  fn fps(&self) -> Option<f64> {
    Some(self.fps)
  }
}
