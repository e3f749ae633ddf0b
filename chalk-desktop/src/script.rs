//! Scripted input for headless peers.
//!
//! A script is a text file with one action per line, each taking one tick:
//!
//! ```text
//! # comment
//! draw 0 10 10        marker 0 touches the active page at (10, 10)
//! draw 0 40 12
//! up                  nothing touches the board this tick
//! wait 5              five idle ticks
//! color 0 255 0 0     marker 0 turns red
//! size 0 12
//! page right
//! clear
//! paste photo.png     start a ghost preview
//! paste-move 0.5 0.5
//! paste-scale 1.5
//! paste-confirm
//! paste-cancel
//! ```
//!
//! Only `draw` produces a touch, so any other action ends a stroke.

use std::str::FromStr;
use std::time::Instant;

use chalk_core::{
    InputSnapshot, MarkerId, PageDirection, Rgba, SurfaceRenderer, Whiteboard,
};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
#[error("line {line}: {message}")]
pub struct ScriptError {
    pub line: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Draw { marker: MarkerId, x: i32, y: i32 },
    Up,
    Wait(u32),
    Color { marker: MarkerId, color: Rgba },
    Size { marker: MarkerId, size: u32 },
    Page(PageDirection),
    Clear,
    Paste(String),
    PasteMove { x: f32, y: f32 },
    PasteScale(f32),
    PasteConfirm,
    PasteCancel,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Script {
    actions: Vec<Action>,
}

impl Script {
    pub fn parse(text: &str) -> Result<Self, ScriptError> {
        let mut actions = Vec::new();
        for (index, raw) in text.lines().enumerate() {
            let line = raw.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let action = parse_action(line).map_err(|message| ScriptError {
                line: index + 1,
                message,
            })?;
            actions.push(action);
        }
        Ok(Self { actions })
    }

    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// Number of ticks the script takes to play.
    pub fn ticks(&self) -> usize {
        self.actions
            .iter()
            .map(|a| match a {
                Action::Wait(n) => (*n).max(1) as usize,
                _ => 1,
            })
            .sum()
    }

    pub fn player(&self) -> ScriptPlayer<'_> {
        ScriptPlayer {
            actions: &self.actions,
            next: 0,
            waiting: 0,
        }
    }
}

fn parse_action(line: &str) -> Result<Action, String> {
    let mut words = line.split_whitespace();
    let verb = words.next().unwrap_or_default().to_ascii_lowercase();
    let args: Vec<&str> = words.collect();

    let expect = |n: usize| {
        if args.len() == n {
            Ok(())
        } else {
            Err(format!("{verb} takes {n} argument(s), got {}", args.len()))
        }
    };

    let action = match verb.as_str() {
        "draw" => {
            expect(3)?;
            Action::Draw {
                marker: MarkerId(number(args[0])?),
                x: number(args[1])?,
                y: number(args[2])?,
            }
        }
        "up" => {
            expect(0)?;
            Action::Up
        }
        "wait" => {
            expect(1)?;
            Action::Wait(number(args[0])?)
        }
        "color" => {
            if args.len() != 4 && args.len() != 5 {
                return Err(format!("color takes 4 or 5 arguments, got {}", args.len()));
            }
            let alpha = match args.get(4) {
                Some(a) => number(a)?,
                None => 255,
            };
            Action::Color {
                marker: MarkerId(number(args[0])?),
                color: Rgba::rgba(number(args[1])?, number(args[2])?, number(args[3])?, alpha),
            }
        }
        "size" => {
            expect(2)?;
            Action::Size {
                marker: MarkerId(number(args[0])?),
                size: number(args[1])?,
            }
        }
        "page" => {
            expect(1)?;
            Action::Page(args[0].parse().map_err(|e| format!("{e}"))?)
        }
        "clear" => {
            expect(0)?;
            Action::Clear
        }
        "paste" => {
            if args.is_empty() {
                return Err("paste needs an image path".into());
            }
            Action::Paste(args.join(" "))
        }
        "paste-move" => {
            expect(2)?;
            Action::PasteMove {
                x: number(args[0])?,
                y: number(args[1])?,
            }
        }
        "paste-scale" => {
            expect(1)?;
            Action::PasteScale(number(args[0])?)
        }
        "paste-confirm" => {
            expect(0)?;
            Action::PasteConfirm
        }
        "paste-cancel" => {
            expect(0)?;
            Action::PasteCancel
        }
        other => return Err(format!("unknown action '{other}'")),
    };
    Ok(action)
}

fn number<T: FromStr>(word: &str) -> Result<T, String> {
    word.parse()
        .map_err(|_| format!("'{word}' is not a valid number"))
}

/// Plays a script against a whiteboard, one tick per call.
pub struct ScriptPlayer<'a> {
    actions: &'a [Action],
    next: usize,
    waiting: u32,
}

impl ScriptPlayer<'_> {
    pub fn is_finished(&self) -> bool {
        self.waiting == 0 && self.next >= self.actions.len()
    }

    /// Apply this tick's action to `board` and return the input to tick with.
    /// `None` once the script is exhausted.
    pub fn step<R: SurfaceRenderer>(
        &mut self,
        board: &mut Whiteboard<R>,
        now: Instant,
    ) -> Option<InputSnapshot> {
        if self.waiting > 0 {
            self.waiting -= 1;
            return Some(InputSnapshot::new());
        }
        let action = self.actions.get(self.next)?;
        self.next += 1;

        let mut input = InputSnapshot::new();
        match action {
            Action::Draw { marker, x, y } => {
                let surface = board.active_surface().id();
                input = input.touch(*marker, surface, *x, *y);
            }
            Action::Up => {}
            Action::Wait(n) => self.waiting = n.saturating_sub(1),
            Action::Color { marker, color } => {
                if let Err(e) = board.set_color(*marker, *color) {
                    log::warn!("Script colour change skipped: {e}");
                }
            }
            Action::Size { marker, size } => {
                if let Err(e) = board.set_pen_size(*marker, *size, now) {
                    log::warn!("Script pen size change skipped: {e}");
                }
            }
            Action::Page(direction) => {
                if !board.switch_page(*direction) {
                    log::info!("Already at {}, page {} ignored", board.page_label(), direction);
                }
            }
            Action::Clear => {
                board.clear_page();
            }
            Action::Paste(source) => board.begin_paste(source.as_str()),
            Action::PasteMove { x, y } => board.move_paste(*x, *y),
            Action::PasteScale(factor) => board.scale_paste(*factor),
            Action::PasteConfirm => {
                if !board.confirm_paste() {
                    log::info!("Nothing to confirm: {}", board.paste_status().text());
                }
            }
            Action::PasteCancel => board.cancel_paste(),
        }
        Some(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chalk_core::{BitmapRenderer, WhiteboardConfig};

    fn board(pages: u32) -> Whiteboard<BitmapRenderer> {
        let config = WhiteboardConfig {
            pages,
            surface_width: 64,
            surface_height: 64,
            ..WhiteboardConfig::default()
        };
        let renderer = BitmapRenderer::new(config.background);
        Whiteboard::init(config, renderer)
    }

    #[test]
    fn test_parse_all_actions() {
        let script = Script::parse(
            "# header\n\
             draw 0 10 12\n\
             up\n\
             wait 3\n\
             color 1 255 0 0\n\
             color 1 1 2 3 4\n\
             size 0 9   # trailing comment\n\
             page Right\n\
             clear\n\
             paste my photo.png\n\
             paste-move 0.25 0.75\n\
             paste-scale 1.5\n\
             paste-confirm\n\
             paste-cancel\n",
        )
        .unwrap();

        let actions = script.actions();
        assert_eq!(actions.len(), 13);
        assert_eq!(
            actions[0],
            Action::Draw {
                marker: MarkerId(0),
                x: 10,
                y: 12
            }
        );
        assert_eq!(actions[2], Action::Wait(3));
        assert_eq!(
            actions[4],
            Action::Color {
                marker: MarkerId(1),
                color: Rgba::rgba(1, 2, 3, 4)
            }
        );
        assert_eq!(actions[6], Action::Page(PageDirection::Right));
        assert_eq!(actions[8], Action::Paste("my photo.png".into()));
        assert_eq!(actions[9], Action::PasteMove { x: 0.25, y: 0.75 });
        assert_eq!(script.ticks(), 15);
    }

    #[test]
    fn test_parse_errors_name_the_line() {
        let err = Script::parse("draw 0 1 1\n\ndraw 0 one 1\n").unwrap_err();
        assert_eq!(err.line, 3);
        assert!(err.message.contains("one"));

        assert_eq!(Script::parse("jump\n").unwrap_err().line, 1);
        assert!(Script::parse("page up\n").is_err());
        assert!(Script::parse("draw 0 1\n").is_err());
        assert!(Script::parse("color 0 300 0 0\n").is_err());
    }

    #[test]
    fn test_player_draws_stroke() {
        let script = Script::parse("draw 0 10 10\ndraw 0 30 10\nup\n").unwrap();
        let mut board = board(1);
        let mut player = script.player();
        let t = Instant::now();

        while let Some(input) = player.step(&mut board, t) {
            board.tick(&input, t);
        }
        assert!(player.is_finished());
        assert!(!board.is_stroking(MarkerId(0)));

        let surface = board.active_surface();
        assert_eq!(board.renderer().pixel(surface, 20, 10), Some(Rgba::WHITE));
        // stamp, stroke point, terminator
        assert_eq!(board.take_outbound().len(), 3);
    }

    #[test]
    fn test_player_wait_and_page() {
        let script = Script::parse("wait 3\npage right\nsize 0 20\n").unwrap();
        let mut board = board(2);
        let mut player = script.player();
        let t = Instant::now();

        let mut ticks = 0;
        while let Some(input) = player.step(&mut board, t) {
            board.tick(&input, t);
            ticks += 1;
        }
        assert_eq!(ticks, script.ticks());
        assert_eq!(board.current_page(), 1);
        assert_eq!(board.pen_size(MarkerId(0)), Some(20));
    }

    #[test]
    fn test_draw_follows_active_page() {
        let script = Script::parse("page right\ndraw 0 5 5\n").unwrap();
        let mut board = board(2);
        let mut player = script.player();
        let t = Instant::now();
        while let Some(input) = player.step(&mut board, t) {
            board.tick(&input, t);
        }
        assert_eq!(board.bound_surface(MarkerId(0)), Some(board.active_surface().id()));
        assert!(board.is_stroking(MarkerId(0)));
    }
}
