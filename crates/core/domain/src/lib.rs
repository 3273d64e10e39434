pub mod data;
pub mod time;

pub use data::{Pollutant, Reading};
pub use time::{Granularity, TimeParseError, parse_monitor_time};

/// 设备数量上限（含）。
pub const MAX_DEVICES: usize = 100;

/// 按序号生成设备编号（1 起始）。
pub fn device_id(index: usize) -> String {
    format!("MN{:05}", index)
}

/// 生成 `count` 个设备编号：MN00001..。
pub fn device_ids(count: usize) -> Vec<String> {
    (1..=count).map(device_id).collect()
}
