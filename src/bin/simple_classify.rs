// 该文件是 Guanshan （关山） 项目的一部分。
// src/bin/simple_classify.rs - 批量分类演示
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

use anyhow::{Context as _, Result};
use clap::Parser;
use url::Url;

use guanshan::{
  FromUrl,
  input::ImageDirectory,
  labels::ClassList,
  model::{ModelVariant, ReplayBuilder, Session, SessionConfig},
  task::ClassifyTask,
};
use tracing::info;

/// 批量分类演示参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 标签文件路径
  #[arg(long, default_value = "labels/coco.yaml", value_name = "FILE")]
  pub labels: PathBuf,

  /// 模型来源（回放后端: replay:///path/to/manifest.json）
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  /// 图片目录（image-dir:///path/to/images）
  #[arg(long, default_value = "image-dir:images", value_name = "SOURCE")]
  pub input: Url,

  /// 模型输入尺寸（正方形边长）
  #[arg(long, default_value = "640", value_name = "SIZE")]
  pub img_size: u32,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.25", value_name = "THRESHOLD")]
  pub confidence: f32,

  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.45", value_name = "THRESHOLD")]
  pub iou: f32,

  /// 启用硬件加速
  #[arg(long)]
  pub accelerate: bool,

  /// 模型变体
  #[arg(long, value_enum, default_value_t = ModelVariant::DetectV8)]
  pub variant: ModelVariant,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("标签文件: {}", args.labels.display());
  info!("模型来源: {}", args.model);
  info!("输入目录: {}", args.input);

  let classes = ClassList::from_yaml_file(&args.labels)?;
  info!("加载 {} 个类别", classes.len());

  let config = SessionConfig {
    model_path: PathBuf::from(args.model.path()),
    input_size: (args.img_size, args.img_size),
    confidence_threshold: args.confidence,
    iou_threshold: args.iou,
    accelerate: args.accelerate,
    variant: args.variant,
  };

  let mut session = ReplayBuilder::from_url(&args.model)?
    .config(config)
    .build()
    .context("无法创建推理会话")?;
  session.set_classes(classes);

  let input = ImageDirectory::from_url(&args.input)?;
  let summary = ClassifyTask::run(&input, &mut session)?;

  info!("处理完成: {} 张图片, {} 个检测", summary.frames, summary.detections);
  Ok(())
}
