// 该文件是 Guanshan （关山） 项目的一部分。
// src/task.rs - 批处理与视频任务
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

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context as _, Result};
use tracing::{debug, info, warn};

use crate::{
  input::{Frame, ImageDirectory, read_rgb},
  model::{Session, best_detection},
  output::{Display, KeyEvent, OutputWriter, Visualizer},
};

/// 协作式取消令牌
///
/// 视频循环每帧检查一次；Ctrl-C 与按键事件都落到同一个令牌上。
#[derive(Clone, Default)]
pub struct CancelToken {
  cancelled: Arc<AtomicBool>,
}

impl CancelToken {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    self.cancelled.store(true, Ordering::SeqCst);
  }

  pub fn is_cancelled(&self) -> bool {
    self.cancelled.load(Ordering::SeqCst)
  }

  /// 把 Ctrl-C 挂到令牌上。
  pub fn install_ctrlc(&self) -> Result<()> {
    let cancelled = self.cancelled.clone();
    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      cancelled.store(true, Ordering::SeqCst);
      std::thread::spawn(|| {
        std::thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })
    .context("无法注册 Ctrl-C 处理器")?;
    Ok(())
  }
}

/// 任务运行统计
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
  /// 处理的帧数/图片数
  pub frames: u64,
  /// 累计检测数
  pub detections: usize,
}

/// 批处理：逐图打印全部检测结果
pub struct ClassifyTask;

impl ClassifyTask {
  pub fn run<S: Session + ?Sized>(input: &ImageDirectory, session: &mut S) -> Result<RunSummary> {
    let entries = input
      .entries()
      .with_context(|| format!("无法读取图片目录 {}", input.path().display()))?;
    info!("目录 {} 中有 {} 张待处理图片", input.path().display(), entries.len());

    let mut summary = RunSummary::default();
    for path in entries {
      let image = match read_rgb(&path) {
        Ok(image) => image,
        Err(e) => {
          warn!("无法加载图片 {}: {}，跳过", path.display(), e);
          continue;
        }
      };

      let detections = session.run(&image)?;
      info!("处理图片: {}", path.display());
      for det in &detections {
        info!(
          "检测类别: {} | 置信度: {:.2}",
          session.classes().label_for(det.class_id),
          det.confidence
        );
      }

      summary.frames += 1;
      summary.detections += detections.len();
    }

    Ok(summary)
  }
}

/// 批处理：逐图标注置信度最高的检测并写出
pub struct AnnotateImagesTask<'a> {
  visualizer: &'a Visualizer,
}

impl<'a> AnnotateImagesTask<'a> {
  pub fn new(visualizer: &'a Visualizer) -> Self {
    AnnotateImagesTask { visualizer }
  }

  pub fn run<S, O>(&self, input: &ImageDirectory, session: &mut S, output: &mut O) -> Result<RunSummary>
  where
    S: Session + ?Sized,
    O: OutputWriter + ?Sized,
  {
    let entries = input
      .entries()
      .with_context(|| format!("无法读取图片目录 {}", input.path().display()))?;
    info!("目录 {} 中有 {} 张待处理图片", input.path().display(), entries.len());

    let mut summary = RunSummary::default();
    for path in entries {
      let mut image = match read_rgb(&path) {
        Ok(image) => image,
        Err(e) => {
          warn!("无法加载图片 {}: {}，跳过", path.display(), e);
          continue;
        }
      };

      let detections = session.run(&image)?;
      match best_detection(&detections) {
        Some(best) => {
          self.visualizer.draw_best(&mut image, best, session.classes());
        }
        None => {
          debug!("图片 {} 没有检测结果", path.display());
        }
      }

      output.write_frame(&image, &detections)?;
      summary.frames += 1;
      summary.detections += detections.len();
    }

    output.finish()?;
    Ok(summary)
  }
}

/// 视频任务：逐帧推理、标注最佳检测、写出并送显
pub struct VideoTask<'a> {
  visualizer: &'a Visualizer,
  overlay: bool,
  cancel: CancelToken,
  max_frames: u64,
}

impl<'a> VideoTask<'a> {
  pub fn new(visualizer: &'a Visualizer) -> Self {
    VideoTask {
      visualizer,
      overlay: false,
      cancel: CancelToken::new(),
      max_frames: 0,
    }
  }

  /// 叠加帧号与推理耗时。
  pub fn with_overlay(mut self, overlay: bool) -> Self {
    self.overlay = overlay;
    self
  }

  pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
    self.cancel = cancel;
    self
  }

  /// 最大处理帧数，0 表示无限制。
  pub fn with_max_frames(mut self, max_frames: u64) -> Self {
    self.max_frames = max_frames;
    self
  }

  pub fn run<I, S, O, D>(
    &self,
    input: I,
    session: &mut S,
    output: &mut O,
    display: &mut D,
  ) -> Result<RunSummary>
  where
    I: Iterator<Item = Result<Frame>>,
    S: Session + ?Sized,
    O: OutputWriter + ?Sized,
    D: Display + ?Sized,
  {
    let loop_result = self.frame_loop(input, session, output, display);
    // 无论循环如何退出，写入器都恰好收尾一次
    let finish_result = output.finish();

    let summary = loop_result?;
    finish_result?;

    info!("视频任务完成: {} 帧, {} 个检测", summary.frames, summary.detections);
    Ok(summary)
  }

  fn frame_loop<I, S, O, D>(
    &self,
    input: I,
    session: &mut S,
    output: &mut O,
    display: &mut D,
  ) -> Result<RunSummary>
  where
    I: Iterator<Item = Result<Frame>>,
    S: Session + ?Sized,
    O: OutputWriter + ?Sized,
    D: Display + ?Sized,
  {
    let mut summary = RunSummary::default();

    for frame_result in input {
      if self.cancel.is_cancelled() {
        warn!("任务被取消，退出循环");
        break;
      }

      let frame = frame_result?;
      let mut image = frame.image;

      let now = Instant::now();
      let detections = session.run(&image)?;
      let elapsed = now.elapsed();
      debug!("帧 {} 推理耗时: {:.2?}", frame.index, elapsed);

      match best_detection(&detections) {
        Some(best) => {
          self.visualizer.draw_best(&mut image, best, session.classes());
        }
        None => {
          debug!("帧 {} 没有检测结果", frame.index);
        }
      }

      if self.overlay {
        let status = format!(
          "frame {} | {:.1} ms",
          frame.index,
          elapsed.as_secs_f64() * 1000.0
        );
        self.visualizer.overlay_status(&mut image, &status);
      }

      output.write_frame(&image, &detections)?;
      display.show(&image)?;

      summary.frames += 1;
      summary.detections += detections.len();

      if let Some(KeyEvent::Esc | KeyEvent::Char('q')) = display.poll_key() {
        info!("收到退出按键，结束视频任务");
        self.cancel.cancel();
        break;
      }

      if self.max_frames > 0 && summary.frames >= self.max_frames {
        info!("达到最大帧数 {}, 退出循环", self.max_frames);
        break;
      }
    }

    Ok(summary)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::RgbImage;

  use crate::labels::ClassList;
  use crate::model::{Detection, SessionError};

  fn det(confidence: f32, class_id: usize) -> Detection {
    Detection {
      x: 4.0,
      y: 30.0,
      width: 16.0,
      height: 12.0,
      confidence,
      class_id,
    }
  }

  /// 按脚本回放检测结果的假会话
  struct FakeSession {
    scripted: Vec<Vec<Detection>>,
    calls: usize,
    classes: ClassList,
  }

  impl FakeSession {
    fn new(scripted: Vec<Vec<Detection>>) -> Self {
      FakeSession {
        scripted,
        calls: 0,
        classes: ClassList::from_names(vec!["rat".into(), "cat".into()]),
      }
    }
  }

  impl Session for FakeSession {
    fn classes(&self) -> &ClassList {
      &self.classes
    }

    fn set_classes(&mut self, classes: ClassList) {
      self.classes = classes;
    }

    fn run(&mut self, _image: &RgbImage) -> Result<Vec<Detection>, SessionError> {
      let result = self.scripted.get(self.calls).cloned().unwrap_or_default();
      self.calls += 1;
      Ok(result)
    }
  }

  /// 只计数的输出写入器
  #[derive(Default)]
  struct CountingWriter {
    frames: usize,
    finished: usize,
  }

  impl OutputWriter for CountingWriter {
    fn write_frame(&mut self, _image: &RgbImage, _detections: &[Detection]) -> Result<()> {
      self.frames += 1;
      Ok(())
    }

    fn finish(&mut self) -> Result<()> {
      self.finished += 1;
      Ok(())
    }
  }

  /// 在指定帧按下按键的假显示
  struct ScriptedDisplay {
    shown: u64,
    press_at: Option<(u64, KeyEvent)>,
  }

  impl ScriptedDisplay {
    fn quiet() -> Self {
      ScriptedDisplay {
        shown: 0,
        press_at: None,
      }
    }

    fn press(frame: u64, key: KeyEvent) -> Self {
      ScriptedDisplay {
        shown: 0,
        press_at: Some((frame, key)),
      }
    }
  }

  impl Display for ScriptedDisplay {
    fn show(&mut self, _image: &RgbImage) -> Result<()> {
      self.shown += 1;
      Ok(())
    }

    fn poll_key(&mut self) -> Option<KeyEvent> {
      match self.press_at {
        Some((frame, key)) if self.shown >= frame => Some(key),
        _ => None,
      }
    }
  }

  fn frames(count: u64) -> impl Iterator<Item = Result<Frame>> {
    (0..count).map(|index| {
      Ok(Frame {
        image: RgbImage::new(64, 64),
        index,
        timestamp_ms: index * 33,
      })
    })
  }

  #[test]
  fn video_task_runs_inference_per_frame() {
    let visualizer = Visualizer::new();
    let mut session = FakeSession::new(vec![vec![det(0.9, 0)], vec![], vec![det(0.5, 1)]]);
    let mut writer = CountingWriter::default();
    let mut display = ScriptedDisplay::quiet();

    let summary = VideoTask::new(&visualizer)
      .run(frames(3), &mut session, &mut writer, &mut display)
      .unwrap();

    assert_eq!(summary.frames, 3);
    assert_eq!(summary.detections, 2);
    assert_eq!(session.calls, 3);
    assert_eq!(writer.frames, 3);
    assert_eq!(writer.finished, 1);
    assert_eq!(display.shown, 3);
  }

  #[test]
  fn video_task_stops_on_quit_key() {
    let visualizer = Visualizer::new();
    let mut session = FakeSession::new(vec![]);
    let mut writer = CountingWriter::default();
    let mut display = ScriptedDisplay::press(2, KeyEvent::Char('q'));

    let summary = VideoTask::new(&visualizer)
      .run(frames(10), &mut session, &mut writer, &mut display)
      .unwrap();

    assert_eq!(summary.frames, 2);
    assert_eq!(writer.finished, 1);
  }

  #[test]
  fn video_task_honors_pre_cancelled_token() {
    let visualizer = Visualizer::new();
    let cancel = CancelToken::new();
    cancel.cancel();

    let mut session = FakeSession::new(vec![vec![det(0.9, 0)]]);
    let mut writer = CountingWriter::default();
    let mut display = ScriptedDisplay::quiet();

    let summary = VideoTask::new(&visualizer)
      .with_cancel(cancel)
      .run(frames(5), &mut session, &mut writer, &mut display)
      .unwrap();

    assert_eq!(summary.frames, 0);
    assert_eq!(session.calls, 0);
    // 取消路径同样收尾一次
    assert_eq!(writer.finished, 1);
  }

  #[test]
  fn video_task_esc_key_also_cancels() {
    let visualizer = Visualizer::new();
    let mut session = FakeSession::new(vec![]);
    let mut writer = CountingWriter::default();
    let mut display = ScriptedDisplay::press(1, KeyEvent::Esc);

    let summary = VideoTask::new(&visualizer)
      .run(frames(10), &mut session, &mut writer, &mut display)
      .unwrap();

    assert_eq!(summary.frames, 1);
  }

  #[test]
  fn video_task_respects_max_frames() {
    let visualizer = Visualizer::new();
    let mut session = FakeSession::new(vec![]);
    let mut writer = CountingWriter::default();
    let mut display = ScriptedDisplay::quiet();

    let summary = VideoTask::new(&visualizer)
      .with_max_frames(4)
      .run(frames(100), &mut session, &mut writer, &mut display)
      .unwrap();

    assert_eq!(summary.frames, 4);
  }

  #[test]
  fn video_task_finishes_writer_on_frame_error() {
    let visualizer = Visualizer::new();
    let mut session = FakeSession::new(vec![]);
    let mut writer = CountingWriter::default();
    let mut display = ScriptedDisplay::quiet();

    let input = vec![
      Ok(Frame {
        image: RgbImage::new(64, 64),
        index: 0,
        timestamp_ms: 0,
      }),
      Err(anyhow::anyhow!("解码失败")),
    ];

    let result = VideoTask::new(&visualizer).run(
      input.into_iter(),
      &mut session,
      &mut writer,
      &mut display,
    );

    assert!(result.is_err());
    // 错误路径写入器仍然收尾一次
    assert_eq!(writer.finished, 1);
  }

  #[test]
  fn classify_task_skips_undecodable_images() {
    let dir = tempfile::tempdir().unwrap();
    RgbImage::new(8, 8).save(dir.path().join("a.jpg")).unwrap();
    std::fs::write(dir.path().join("broken.png"), b"garbage").unwrap();
    std::fs::write(dir.path().join("c.txt"), b"not an image").unwrap();

    let mut session = FakeSession::new(vec![vec![det(0.9, 0), det(0.4, 1)]]);
    let input = ImageDirectory::new(dir.path());

    let summary = ClassifyTask::run(&input, &mut session).unwrap();

    // a.jpg 处理成功，broken.png 解码失败被跳过，c.txt 被扩展名过滤
    assert_eq!(summary.frames, 1);
    assert_eq!(summary.detections, 2);
    assert_eq!(session.calls, 1);
  }

  #[test]
  fn annotate_task_draws_best_and_writes_all() {
    let dir = tempfile::tempdir().unwrap();
    RgbImage::new(64, 64).save(dir.path().join("a.png")).unwrap();
    RgbImage::new(64, 64).save(dir.path().join("b.png")).unwrap();

    let visualizer = Visualizer::new();
    let mut session = FakeSession::new(vec![vec![det(0.3, 0), det(0.8, 1)], vec![]]);
    let mut writer = CountingWriter::default();
    let input = ImageDirectory::new(dir.path());

    let summary = AnnotateImagesTask::new(&visualizer)
      .run(&input, &mut session, &mut writer)
      .unwrap();

    // 无检测的图片也会原样写出
    assert_eq!(summary.frames, 2);
    assert_eq!(summary.detections, 2);
    assert_eq!(writer.frames, 2);
    assert_eq!(writer.finished, 1);
  }
}
