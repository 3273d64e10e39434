use chrono::NaiveDateTime;
use rust_decimal::Decimal;

/// 一条空气质量监测读数（合成后不可变）。
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub id: u64,
    /// 设备编号（MN00001 形式）。
    pub device_id: String,
    /// 监测时间（秒级）。
    pub monitor_time: NaiveDateTime,
    pub pm25: Decimal,
    pub pm10: Decimal,
    pub co: Decimal,
    pub no2: Decimal,
    pub so2: Decimal,
    pub o3: Decimal,
}

/// 污染物字段。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pollutant {
    Pm25,
    Pm10,
    Co,
    No2,
    So2,
    O3,
}

impl Pollutant {
    pub const ALL: [Pollutant; 6] = [
        Pollutant::Pm25,
        Pollutant::Pm10,
        Pollutant::Co,
        Pollutant::No2,
        Pollutant::So2,
        Pollutant::O3,
    ];

    /// 存储列名。
    pub fn column(self) -> &'static str {
        match self {
            Pollutant::Pm25 => "pm25",
            Pollutant::Pm10 => "pm10",
            Pollutant::Co => "co",
            Pollutant::No2 => "no2",
            Pollutant::So2 => "so2",
            Pollutant::O3 => "o3",
        }
    }

    /// 存储列的小数位数（CO 为 3 位，其余 2 位）。
    pub fn scale(self) -> u32 {
        match self {
            Pollutant::Co => 3,
            _ => 2,
        }
    }
}

impl Reading {
    pub fn value(&self, pollutant: Pollutant) -> Decimal {
        match pollutant {
            Pollutant::Pm25 => self.pm25,
            Pollutant::Pm10 => self.pm10,
            Pollutant::Co => self.co,
            Pollutant::No2 => self.no2,
            Pollutant::So2 => self.so2,
            Pollutant::O3 => self.o3,
        }
    }
}
