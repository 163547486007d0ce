// 该文件是 Shanan （山南西风） 项目的一部分。
// src/model/labels.rs - 类别名称表
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

use std::{path::Path, sync::Arc};

use tracing::info;

use super::ModelError;

/// COCO 数据集类别名称
pub const COCO_CLASSES: [&str; 80] = [
  "person",
  "bicycle",
  "car",
  "motorcycle",
  "airplane",
  "bus",
  "train",
  "truck",
  "boat",
  "traffic light",
  "fire hydrant",
  "stop sign",
  "parking meter",
  "bench",
  "bird",
  "cat",
  "dog",
  "horse",
  "sheep",
  "cow",
  "elephant",
  "bear",
  "zebra",
  "giraffe",
  "backpack",
  "umbrella",
  "handbag",
  "tie",
  "suitcase",
  "frisbee",
  "skis",
  "snowboard",
  "sports ball",
  "kite",
  "baseball bat",
  "baseball glove",
  "skateboard",
  "surfboard",
  "tennis racket",
  "bottle",
  "wine glass",
  "cup",
  "fork",
  "knife",
  "spoon",
  "bowl",
  "banana",
  "apple",
  "sandwich",
  "orange",
  "broccoli",
  "carrot",
  "hot dog",
  "pizza",
  "donut",
  "cake",
  "chair",
  "couch",
  "potted plant",
  "bed",
  "dining table",
  "toilet",
  "tv",
  "laptop",
  "mouse",
  "remote",
  "keyboard",
  "cell phone",
  "microwave",
  "oven",
  "toaster",
  "sink",
  "refrigerator",
  "book",
  "clock",
  "vase",
  "scissors",
  "teddy bear",
  "hair drier",
  "toothbrush",
];

/// 类别名称表，行号即类别 ID
///
/// 只读共享，克隆只增加引用计数。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassNameTable {
  names: Arc<[String]>,
}

impl ClassNameTable {
  /// 读取名称文件，每行一个类别；忽略行尾空白与末尾空行
  pub fn load(path: impl AsRef<Path>) -> Result<Self, ModelError> {
    let path = path.as_ref();
    let content =
      std::fs::read_to_string(path).map_err(|e| ModelError::load(path.display().to_string(), e))?;

    let mut names = content
      .lines()
      .map(|line| line.trim_end().to_string())
      .collect::<Vec<_>>();
    while names.last().is_some_and(|name| name.is_empty()) {
      names.pop();
    }

    if names.is_empty() {
      return Err(ModelError::load(path.display().to_string(), "类别名称文件为空"));
    }

    info!("已加载 {} 个类别名称: {}", names.len(), path.display());
    Ok(Self::from(names))
  }

  /// 内置的 80 类 COCO 名称表
  pub fn coco() -> Self {
    COCO_CLASSES.iter().map(|name| name.to_string()).collect()
  }

  pub fn get(&self, class_id: usize) -> Option<&str> {
    self.names.get(class_id).map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }
}

impl From<Vec<String>> for ClassNameTable {
  fn from(names: Vec<String>) -> Self {
    Self {
      names: names.into(),
    }
  }
}

impl FromIterator<String> for ClassNameTable {
  fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
    Self::from(iter.into_iter().collect::<Vec<_>>())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn builtin_coco_table() {
    let table = ClassNameTable::coco();
    assert_eq!(table.len(), 80);
    assert_eq!(table.get(0), Some("person"));
    assert_eq!(table.get(2), Some("car"));
    assert_eq!(table.get(80), None);
  }

  #[test]
  fn loads_names_in_line_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("obj.names");
    std::fs::write(&path, "cat\r\ndog \n\nbird\n\n").unwrap();

    let table = ClassNameTable::load(&path).unwrap();
    assert_eq!(table.len(), 4);
    assert_eq!(table.get(0), Some("cat"));
    assert_eq!(table.get(1), Some("dog"));
    assert_eq!(table.get(2), Some(""));
    assert_eq!(table.get(3), Some("bird"));

    let shared = table.clone();
    assert_eq!(shared, table);
  }

  #[test]
  fn empty_or_missing_file_fails_to_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("empty.names");
    std::fs::write(&path, "\n\n").unwrap();
    assert!(matches!(
      ClassNameTable::load(&path),
      Err(ModelError::ModelLoad { .. })
    ));
    assert!(ClassNameTable::load(dir.path().join("missing.names")).is_err());
  }
}
