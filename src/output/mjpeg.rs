// 该文件是 Hushen （护身） 项目的一部分。
// src/output/mjpeg.rs - multipart/x-mixed-replace 分块编码
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Hushen 项目贡献者

use image::{RgbImage, codecs::jpeg::JpegEncoder};

/// 分块边界
pub const BOUNDARY: &str = "frame";

/// 实时流响应的 Content-Type
pub const STREAM_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=frame";

const PART_HEADER: &[u8] = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n";
const PART_TRAILER: &[u8] = b"\r\n";

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, image::ImageError> {
  let mut buffer = Vec::with_capacity((image.width() * image.height() / 4) as usize);
  let mut encoder = JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100));
  encoder.encode_image(image)?;
  Ok(buffer)
}

/// 用边界和头部包装一帧 JPEG 数据
pub fn frame_chunk(jpeg: &[u8]) -> Vec<u8> {
  let mut chunk = Vec::with_capacity(PART_HEADER.len() + jpeg.len() + PART_TRAILER.len());
  chunk.extend_from_slice(PART_HEADER);
  chunk.extend_from_slice(jpeg);
  chunk.extend_from_slice(PART_TRAILER);
  chunk
}

/// 取出分块中的 JPEG 数据，格式不符时返回 `None`
pub fn chunk_payload(chunk: &[u8]) -> Option<&[u8]> {
  chunk
    .strip_prefix(PART_HEADER)?
    .strip_suffix(PART_TRAILER)
}
