//! 交互式输入任务参数（未通过环境变量给出时使用）。
//!
//! 每一项输入无效时提示原因并重新询问；输入流结束返回 `PromptError::Closed`。

use aq_config::{ConfigError, RunRequest};
use chrono::NaiveDateTime;
use domain::{Granularity, MAX_DEVICES, parse_monitor_time};
use std::io::{BufRead, Write};

#[derive(Debug, thiserror::Error)]
pub enum PromptError {
    #[error("prompt io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("input closed before the run request was complete")]
    Closed,
    #[error(transparent)]
    Invalid(#[from] ConfigError),
}

pub struct Prompt<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> Prompt<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    /// 依次询问开始/结束时间、粒度、设备数与记录上限。
    pub fn ask_request(&mut self) -> Result<RunRequest, PromptError> {
        writeln!(self.output, "\n=== 空气质量数据生成器 ===")?;
        let (start, end) = loop {
            let start = self.ask_time("开始时间 (YYYY-MM-DD HH:MM:SS): ")?;
            let end = self.ask_time("结束时间 (YYYY-MM-DD HH:MM:SS): ")?;
            if end > start {
                break (start, end);
            }
            writeln!(self.output, "错误：结束时间必须晚于开始时间")?;
        };
        let granularity = self.ask_granularity()?;
        let device_count = self.ask_device_count()?;
        let max_records = self.ask_limit()?;

        Ok(RunRequest::new(
            start,
            end,
            granularity,
            device_count,
            max_records,
        )?)
    }

    fn ask_time(&mut self, label: &str) -> Result<NaiveDateTime, PromptError> {
        loop {
            let line = self.ask(label)?;
            match parse_monitor_time(&line) {
                Ok(time) => return Ok(time),
                Err(_) => writeln!(self.output, "错误：无法识别的时间格式 `{line}`")?,
            }
        }
    }

    fn ask_granularity(&mut self) -> Result<Granularity, PromptError> {
        writeln!(self.output, "数据间隔：1. 每秒  2. 每分钟  3. 每小时")?;
        loop {
            let line = self.ask("请选择 (1-3): ")?;
            match line.parse::<Granularity>() {
                Ok(granularity) => return Ok(granularity),
                Err(_) => writeln!(self.output, "错误：请输入 1、2 或 3")?,
            }
        }
    }

    fn ask_device_count(&mut self) -> Result<usize, PromptError> {
        loop {
            let line = self.ask(&format!("设备数量 (1-{MAX_DEVICES}): "))?;
            match line.parse::<usize>() {
                Ok(count) if (1..=MAX_DEVICES).contains(&count) => return Ok(count),
                _ => writeln!(self.output, "错误：设备数量必须在 1-{MAX_DEVICES} 之间")?,
            }
        }
    }

    fn ask_limit(&mut self) -> Result<Option<u64>, PromptError> {
        writeln!(self.output, "生成限制：1. 仅按时间范围  2. 设置最大记录数")?;
        loop {
            match self.ask("请选择 (1-2): ")?.as_str() {
                "1" => return Ok(None),
                "2" => break,
                _ => writeln!(self.output, "错误：请输入 1 或 2")?,
            }
        }
        loop {
            let line = self.ask("最大记录数: ")?;
            match line.parse::<u64>() {
                Ok(limit) if limit > 0 => return Ok(Some(limit)),
                _ => writeln!(self.output, "错误：记录数必须是大于 0 的整数")?,
            }
        }
    }

    fn ask(&mut self, label: &str) -> Result<String, PromptError> {
        write!(self.output, "{label}")?;
        self.output.flush()?;
        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Err(PromptError::Closed);
        }
        Ok(line.trim().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn ask(script: &str) -> (Result<RunRequest, PromptError>, String) {
        let mut output = Vec::new();
        let result = Prompt::new(Cursor::new(script.to_string()), &mut output).ask_request();
        (result, String::from_utf8(output).unwrap_or_default())
    }

    #[test]
    fn reads_a_complete_request() {
        let (result, _) = ask("2024-01-01 00:00:00\n2024-01-01 01:00:00\n2\n3\n1\n");
        let request = result.expect("request");
        assert_eq!(request.granularity, Granularity::Minute);
        assert_eq!(request.device_count, 3);
        assert_eq!(request.max_records, None);
        assert_eq!(request.expected_records(), 180);
    }

    #[test]
    fn reasks_after_invalid_answers() {
        let script = "\
2024-01-01 01:00:00
2024-01-01 00:00:00
2024-01-01 00:00:00
yesterday
2024-01-01 00:10:00
9
s
0
101
5
3
2
-4
250
";
        let (result, output) = ask(script);
        let request = result.expect("request");
        assert_eq!(request.granularity, Granularity::Second);
        assert_eq!(request.device_count, 5);
        assert_eq!(request.max_records, Some(250));
        assert!(output.contains("结束时间必须晚于开始时间"));
        assert!(output.contains("无法识别的时间格式"));
        assert!(output.contains("设备数量必须在"));
        assert!(output.contains("请输入 1 或 2"));
        assert!(output.contains("记录数必须是大于 0 的整数"));
    }

    #[test]
    fn closed_input_is_an_error() {
        let (result, _) = ask("2024-01-01 00:00:00\n");
        assert!(matches!(result, Err(PromptError::Closed)));
    }
}
