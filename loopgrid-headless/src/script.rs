use std::time::Duration;

use loopgrid_core::{GraphStage, KeyNumber};

use crate::error::HeadlessError;

/// One scripted input event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptStep {
    Down(u8),
    Up(u8),
    Wait(Duration),
    /// Deliver this many synthetic frames straight into the capture input.
    Feed(u32),
    /// Pull this many composited frames.
    Render(u32),
    Stage(GraphStage),
}

/// Sequence of key events standing in for a keyboard.
///
/// Steps are separated by `;` or newlines; `#` starts a comment.
///
/// ```text
/// down 1; wait 500; up 1
/// down 2; feed 12; up 2
/// render 30
/// stage paused
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyScript {
    steps: Vec<ScriptStep>,
}

impl KeyScript {
    pub fn parse(text: &str) -> Result<Self, HeadlessError> {
        let mut steps = Vec::new();
        for (index, line) in text.lines().enumerate() {
            let line_no = index + 1;
            let code = line.split('#').next().unwrap_or_default();
            for part in code.split(';') {
                let words: Vec<&str> = part.split_whitespace().collect();
                if words.is_empty() {
                    continue;
                }
                steps.push(parse_step(&words).map_err(|message| HeadlessError::Script {
                    line: line_no,
                    message,
                })?);
            }
        }
        Ok(Self { steps })
    }

    pub fn steps(&self) -> &[ScriptStep] {
        &self.steps
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Total time spent in `wait` steps.
    pub fn total_wait(&self) -> Duration {
        self.steps
            .iter()
            .map(|step| match step {
                ScriptStep::Wait(d) => *d,
                _ => Duration::ZERO,
            })
            .sum()
    }
}

fn parse_step(words: &[&str]) -> Result<ScriptStep, String> {
    let [command, arg] = words else {
        return Err(format!("expected '<command> <argument>', got '{}'", words.join(" ")));
    };

    match command.to_ascii_lowercase().as_str() {
        "down" => parse_key(arg).map(ScriptStep::Down),
        "up" => parse_key(arg).map(ScriptStep::Up),
        "wait" => arg
            .parse::<u64>()
            .map(|ms| ScriptStep::Wait(Duration::from_millis(ms)))
            .map_err(|_| format!("invalid wait '{}', expected milliseconds", arg)),
        "feed" => arg
            .parse::<u32>()
            .map(ScriptStep::Feed)
            .map_err(|_| format!("invalid feed count '{}'", arg)),
        "render" => arg
            .parse::<u32>()
            .map(ScriptStep::Render)
            .map_err(|_| format!("invalid render count '{}'", arg)),
        "stage" => parse_stage(arg).map(ScriptStep::Stage),
        other => Err(format!("unknown command '{}'", other)),
    }
}

fn parse_key(arg: &str) -> Result<u8, String> {
    let key: u8 = arg
        .parse()
        .map_err(|_| format!("invalid key '{}'", arg))?;
    KeyNumber::new(key).map_err(|e| e.to_string())?;
    Ok(key)
}

fn parse_stage(arg: &str) -> Result<GraphStage, String> {
    match arg.to_ascii_lowercase().as_str() {
        "idle" => Ok(GraphStage::Idle),
        "ready" => Ok(GraphStage::Ready),
        "paused" => Ok(GraphStage::Paused),
        "active" => Ok(GraphStage::Active),
        _ => Err(format!("unknown stage '{}'", arg)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mixed_separators() {
        let script = KeyScript::parse("down 1; wait 200\nup 1 # release\n\nrender 3").unwrap();
        assert_eq!(
            script.steps(),
            &[
                ScriptStep::Down(1),
                ScriptStep::Wait(Duration::from_millis(200)),
                ScriptStep::Up(1),
                ScriptStep::Render(3),
            ]
        );
        assert_eq!(script.total_wait(), Duration::from_millis(200));
    }

    #[test]
    fn parses_feed() {
        let script = KeyScript::parse("down 4; feed 12; up 4").unwrap();
        assert_eq!(
            script.steps(),
            &[ScriptStep::Down(4), ScriptStep::Feed(12), ScriptStep::Up(4)]
        );
        assert_eq!(script.total_wait(), Duration::ZERO);
        assert!(KeyScript::parse("feed -1").is_err());
    }

    #[test]
    fn parses_stage() {
        let script = KeyScript::parse("stage PAUSED").unwrap();
        assert_eq!(script.steps(), &[ScriptStep::Stage(GraphStage::Paused)]);
    }

    #[test]
    fn rejects_out_of_range_key() {
        let err = KeyScript::parse("down 1\ndown 10").unwrap_err();
        assert!(matches!(err, HeadlessError::Script { line: 2, .. }));
    }

    #[test]
    fn rejects_unknown_command() {
        assert!(KeyScript::parse("press 1").is_err());
        assert!(KeyScript::parse("wait").is_err());
        assert!(KeyScript::parse("wait soon").is_err());
    }

    #[test]
    fn empty_script() {
        let script = KeyScript::parse("# nothing\n;;").unwrap();
        assert!(script.is_empty());
    }
}
