//! Word-level codec for the producer and consumer areas.
//!
//! The producer path carries `[count] ([seq][len][kind, args...])*` command
//! records; the consumer path carries the exchange header, an optional pixel
//! block, and the telemetry trailer. Both operate on plain `i32` slices so
//! the codec never touches the mapping or the locks.

use crate::command::{Command, CommandPayload, MouseAction};
use crate::command::{
    CMD_ASK_ANSWERED, CMD_CONTINUE_DRAG, CMD_DISCARD_WORLD, CMD_END_DRAG, CMD_INSTANTIATE_WORLD,
    CMD_KEY_DOWN, CMD_KEY_TYPED, CMD_KEY_UP, CMD_MOUSE_CLICKED, CMD_MOUSE_DRAGGED,
    CMD_MOUSE_EXITED, CMD_MOUSE_MOVED, CMD_MOUSE_PRESSED, CMD_MOUSE_RELEASED, CMD_PAUSE,
    CMD_PROPERTY_CHANGED, CMD_RUN, CMD_SET_SPEED, CMD_STEP_ONCE, CMD_WORLD_FOCUS_GAINED,
    CMD_WORLD_FOCUS_LOST,
};
use crate::frame::{AskRequest, ConsumerStatus};
use crate::layout::{
    CONSUMER_HEIGHT, CONSUMER_PAINT_SEQ, CONSUMER_PIXELS, CONSUMER_SEQ, CONSUMER_WIDTH, WORD_BYTES,
};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WireError {
    #[error("unexpected end of area at word {0}")]
    UnexpectedEnd(usize),
    #[error("unknown command kind: {0}")]
    UnknownCommandKind(i32),
    #[error("invalid data: {0}")]
    InvalidData(&'static str),
    #[error("single command of {words} words exceeds the command area ({capacity} words)")]
    CommandTooLarge { words: usize, capacity: usize },
    #[error(
        "world image needs {required_bytes} bytes but the shared region holds {available_bytes}; \
         raise VIVARIUM_SHM_SIZE (or shm.size in the project settings) and relaunch the scenario"
    )]
    ProtocolOverflow {
        required_bytes: usize,
        available_bytes: usize,
    },
}

struct WordReader<'a> {
    words: &'a [i32],
    pos: usize,
}

impl<'a> WordReader<'a> {
    fn new(words: &'a [i32]) -> Self {
        Self { words, pos: 0 }
    }

    fn read(&mut self) -> Result<i32, WireError> {
        let value = self
            .words
            .get(self.pos)
            .copied()
            .ok_or(WireError::UnexpectedEnd(self.pos))?;
        self.pos += 1;
        Ok(value)
    }

    fn read_len(&mut self) -> Result<usize, WireError> {
        let value = self.read()?;
        usize::try_from(value).map_err(|_| WireError::InvalidData("negative length"))
    }

    fn read_string(&mut self, len: usize) -> Result<String, WireError> {
        let mut out = String::with_capacity(len);
        for _ in 0..len {
            let word = self.read()?;
            let cp = u32::try_from(word).map_err(|_| WireError::InvalidData("negative codepoint"))?;
            out.push(char::from_u32(cp).ok_or(WireError::InvalidData("invalid codepoint"))?);
        }
        Ok(out)
    }

    fn skip(&mut self, words: usize) -> Result<(), WireError> {
        let end = self.pos + words;
        if end > self.words.len() {
            return Err(WireError::UnexpectedEnd(self.words.len()));
        }
        self.pos = end;
        Ok(())
    }

    fn position(&self) -> usize {
        self.pos
    }
}

struct WordWriter<'a> {
    words: &'a mut [i32],
    pos: usize,
}

impl<'a> WordWriter<'a> {
    fn new(words: &'a mut [i32]) -> Self {
        Self { words, pos: 0 }
    }

    fn write(&mut self, value: i32) -> Result<(), WireError> {
        let slot = self
            .words
            .get_mut(self.pos)
            .ok_or(WireError::UnexpectedEnd(self.pos))?;
        *slot = value;
        self.pos += 1;
        Ok(())
    }

    fn write_at(&mut self, pos: usize, value: i32) -> Result<(), WireError> {
        let slot = self
            .words
            .get_mut(pos)
            .ok_or(WireError::UnexpectedEnd(pos))?;
        *slot = value;
        Ok(())
    }

    fn write_string(&mut self, text: &str) -> Result<(), WireError> {
        for ch in text.chars() {
            self.write(ch as i32)?;
        }
        Ok(())
    }

    fn skip(&mut self, words: usize) -> Result<(), WireError> {
        let end = self.pos + words;
        if end > self.words.len() {
            return Err(WireError::UnexpectedEnd(self.words.len()));
        }
        self.pos = end;
        Ok(())
    }

    fn remaining(&self) -> usize {
        self.words.len() - self.pos
    }
}

/// Encode pending commands into the command area (the slice starting at the
/// command-count word). Writes as many complete records as fit and returns
/// how many were issued; the rest stay pending for the next exchange.
pub fn encode_commands(area: &mut [i32], commands: &[Command]) -> Result<usize, WireError> {
    let capacity = area.len().saturating_sub(1);
    let mut writer = WordWriter::new(area);
    writer.write(0)?;

    let mut issued = 0usize;
    for command in commands {
        let record = command.record_words();
        if record > writer.remaining() {
            if issued == 0 {
                return Err(WireError::CommandTooLarge {
                    words: record,
                    capacity,
                });
            }
            break;
        }
        writer.write(command.seq)?;
        writer.write((1 + command.payload.arg_words()) as i32)?;
        writer.write(command.payload.kind())?;
        encode_args(&mut writer, &command.payload)?;
        issued += 1;
    }
    writer.write_at(0, issued as i32)?;
    Ok(issued)
}

fn encode_args(w: &mut WordWriter<'_>, payload: &CommandPayload) -> Result<(), WireError> {
    match payload {
        CommandPayload::KeyDown { code, text }
        | CommandPayload::KeyUp { code, text }
        | CommandPayload::KeyTyped { code, text } => {
            w.write(*code)?;
            w.write_string(text)?;
        }
        CommandPayload::Mouse {
            x,
            y,
            button,
            click_count,
            ..
        } => {
            w.write(*x)?;
            w.write(*y)?;
            w.write(*button)?;
            w.write(*click_count)?;
        }
        CommandPayload::Run
        | CommandPayload::Pause
        | CommandPayload::StepOnce
        | CommandPayload::DiscardWorld
        | CommandPayload::WorldFocusGained
        | CommandPayload::WorldFocusLost => {}
        CommandPayload::InstantiateWorld { class_name } => w.write_string(class_name)?,
        CommandPayload::ContinueDrag { drag_id, x, y } => {
            w.write(*drag_id)?;
            w.write(*x)?;
            w.write(*y)?;
        }
        CommandPayload::EndDrag { drag_id } => w.write(*drag_id)?,
        CommandPayload::AskAnswered { answer } => w.write_string(answer)?,
        CommandPayload::PropertyChanged { key, value } => {
            w.write(key.chars().count() as i32)?;
            w.write_string(key)?;
            match value {
                Some(v) => {
                    w.write(v.chars().count() as i32)?;
                    w.write_string(v)?;
                }
                None => w.write(-1)?,
            }
        }
        CommandPayload::SetSpeed { speed } => w.write(*speed)?,
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedCommands {
    pub commands: Vec<Command>,
    /// Sequence of the last decoded record, to acknowledge back.
    pub last_seq: Option<i32>,
}

/// Decode the command area written by [`encode_commands`].
pub fn decode_commands(area: &[i32]) -> Result<DecodedCommands, WireError> {
    let mut reader = WordReader::new(area);
    let count = reader.read_len()?;
    let mut commands = Vec::with_capacity(count);
    let mut last_seq = None;
    for _ in 0..count {
        let seq = reader.read()?;
        let len = reader.read_len()?;
        if len == 0 {
            return Err(WireError::InvalidData("empty command record"));
        }
        let kind = reader.read()?;
        let payload = decode_args(&mut reader, kind, len - 1)?;
        last_seq = Some(seq);
        commands.push(Command { seq, payload });
    }
    Ok(DecodedCommands { commands, last_seq })
}

fn decode_args(r: &mut WordReader<'_>, kind: i32, args: usize) -> Result<CommandPayload, WireError> {
    let key_event = |r: &mut WordReader<'_>| -> Result<(i32, String), WireError> {
        if args == 0 {
            return Err(WireError::InvalidData("key event without keycode"));
        }
        let code = r.read()?;
        let text = r.read_string(args - 1)?;
        Ok((code, text))
    };
    let mouse_event = |r: &mut WordReader<'_>, action: MouseAction| -> Result<CommandPayload, WireError> {
        if args != 4 {
            return Err(WireError::InvalidData("mouse event expects four arguments"));
        }
        Ok(CommandPayload::Mouse {
            action,
            x: r.read()?,
            y: r.read()?,
            button: r.read()?,
            click_count: r.read()?,
        })
    };

    match kind {
        CMD_KEY_DOWN => {
            let (code, text) = key_event(r)?;
            Ok(CommandPayload::KeyDown { code, text })
        }
        CMD_KEY_UP => {
            let (code, text) = key_event(r)?;
            Ok(CommandPayload::KeyUp { code, text })
        }
        CMD_KEY_TYPED => {
            let (code, text) = key_event(r)?;
            Ok(CommandPayload::KeyTyped { code, text })
        }
        CMD_MOUSE_CLICKED => mouse_event(r, MouseAction::Clicked),
        CMD_MOUSE_PRESSED => mouse_event(r, MouseAction::Pressed),
        CMD_MOUSE_RELEASED => mouse_event(r, MouseAction::Released),
        CMD_MOUSE_DRAGGED => mouse_event(r, MouseAction::Dragged),
        CMD_MOUSE_MOVED => mouse_event(r, MouseAction::Moved),
        CMD_MOUSE_EXITED => mouse_event(r, MouseAction::Exited),
        CMD_RUN => Ok(CommandPayload::Run),
        CMD_PAUSE => Ok(CommandPayload::Pause),
        CMD_STEP_ONCE => Ok(CommandPayload::StepOnce),
        CMD_INSTANTIATE_WORLD => Ok(CommandPayload::InstantiateWorld {
            class_name: r.read_string(args)?,
        }),
        CMD_DISCARD_WORLD => Ok(CommandPayload::DiscardWorld),
        CMD_CONTINUE_DRAG => {
            if args != 3 {
                return Err(WireError::InvalidData("continue-drag expects three arguments"));
            }
            Ok(CommandPayload::ContinueDrag {
                drag_id: r.read()?,
                x: r.read()?,
                y: r.read()?,
            })
        }
        CMD_END_DRAG => {
            if args != 1 {
                return Err(WireError::InvalidData("end-drag expects one argument"));
            }
            Ok(CommandPayload::EndDrag { drag_id: r.read()? })
        }
        CMD_ASK_ANSWERED => Ok(CommandPayload::AskAnswered {
            answer: r.read_string(args)?,
        }),
        CMD_PROPERTY_CHANGED => {
            let key_len = r.read_len()?;
            let key = r.read_string(key_len)?;
            let value_len = r.read()?;
            let value = if value_len < 0 {
                None
            } else {
                Some(r.read_string(value_len as usize)?)
            };
            Ok(CommandPayload::PropertyChanged { key, value })
        }
        CMD_SET_SPEED => {
            if args != 1 {
                return Err(WireError::InvalidData("set-speed expects one argument"));
            }
            Ok(CommandPayload::SetSpeed { speed: r.read()? })
        }
        CMD_WORLD_FOCUS_GAINED => Ok(CommandPayload::WorldFocusGained),
        CMD_WORLD_FOCUS_LOST => Ok(CommandPayload::WorldFocusLost),
        other => Err(WireError::UnknownCommandKind(other)),
    }
}

/// A freshly rendered image to include in a consumer frame.
#[derive(Debug, Clone, Copy)]
pub struct ImageFrame<'a> {
    pub width: u32,
    pub height: u32,
    pub pixels: &'a [i32],
}

fn trailer_words(status: &ConsumerStatus) -> usize {
    // ack, errors, time hi/lo, speed, world counter, cell size, ask id,
    // delay flag, ready flag
    let fixed = 10;
    match &status.ask {
        Some(ask) => fixed + 1 + ask.prompt.chars().count(),
        None => fixed,
    }
}

/// Encode a full consumer-area frame.
///
/// With `image` present the pixel block is written and its word count
/// returned; without it the previous image's span (`last_paint_words`) is
/// skipped untouched and width/height are published as zero so the decoder
/// knows no image accompanies this exchange.
///
/// The overflow check runs before anything is written: an oversized image
/// fails with [`WireError::ProtocolOverflow`] leaving the area intact, and
/// the caller retries the exchange without the image.
pub fn encode_consumer_frame(
    area: &mut [i32],
    exchange_seq: i32,
    image: Option<ImageFrame<'_>>,
    last_paint_seq: i32,
    last_paint_words: usize,
    status: &ConsumerStatus,
) -> Result<usize, WireError> {
    let pixel_words = match &image {
        Some(frame) => frame.pixels.len(),
        None => last_paint_words,
    };
    let required = CONSUMER_PIXELS + pixel_words + trailer_words(status);
    if required > area.len() {
        return Err(WireError::ProtocolOverflow {
            required_bytes: required * WORD_BYTES,
            available_bytes: area.len() * WORD_BYTES,
        });
    }

    let mut writer = WordWriter::new(area);
    writer.write(exchange_seq)?;
    match image {
        Some(frame) => {
            debug_assert_eq!(frame.pixels.len(), (frame.width * frame.height) as usize);
            writer.write(exchange_seq)?;
            writer.write(frame.width as i32)?;
            writer.write(frame.height as i32)?;
            for &px in frame.pixels {
                writer.write(px)?;
            }
        }
        None => {
            writer.write(last_paint_seq)?;
            writer.write(0)?;
            writer.write(0)?;
            writer.skip(last_paint_words)?;
        }
    }

    writer.write(status.last_ack_command)?;
    writer.write(status.error_count)?;
    writer.write((status.user_code_started_at >> 32) as i32)?;
    writer.write((status.user_code_started_at & 0xFFFF_FFFF) as i32)?;
    writer.write(status.speed)?;
    writer.write(status.world_counter)?;
    writer.write(status.cell_size)?;
    match &status.ask {
        Some(ask) => {
            writer.write(ask.id)?;
            writer.write(ask.prompt.chars().count() as i32)?;
            writer.write_string(&ask.prompt)?;
        }
        None => writer.write(-1)?,
    }
    writer.write(status.delay_loop_active as i32)?;
    writer.write(status.ready_for_invocations as i32)?;
    Ok(pixel_words)
}

/// A decoded consumer frame. `pixel_range` indexes into the decoded area so
/// the caller can copy pixels out while still holding the consumer lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame {
    pub exchange_seq: i32,
    pub paint_seq: i32,
    /// Width/height and the pixel span, present when this exchange carried
    /// an image.
    pub image: Option<(u32, u32, std::ops::Range<usize>)>,
    /// Pixel span width in words, whether fresh or skipped; feed back in as
    /// `last_image_words` on the next decode.
    pub image_words: usize,
    pub status: ConsumerStatus,
}

/// Decode the consumer area. `last_image_words` must be the span returned by
/// the previous decode (0 before any image was ever seen): a telemetry-only
/// exchange publishes zero width/height and the stale pixel block is skipped
/// rather than re-read.
pub fn decode_consumer_frame(
    area: &[i32],
    last_image_words: usize,
) -> Result<DecodedFrame, WireError> {
    let mut reader = WordReader::new(area);
    debug_assert_eq!(CONSUMER_SEQ, 0);
    let exchange_seq = reader.read()?;
    debug_assert_eq!(CONSUMER_PAINT_SEQ, 1);
    let paint_seq = reader.read()?;
    debug_assert_eq!(CONSUMER_WIDTH, 2);
    let width = reader.read()?;
    debug_assert_eq!(CONSUMER_HEIGHT, 3);
    let height = reader.read()?;
    if width < 0 || height < 0 {
        return Err(WireError::InvalidData("negative image dimensions"));
    }

    let (image, image_words) = if width == 0 || height == 0 {
        reader.skip(last_image_words)?;
        (None, last_image_words)
    } else {
        let span = width as usize * height as usize;
        let start = reader.position();
        reader.skip(span)?;
        (Some((width as u32, height as u32, start..start + span)), span)
    };

    let last_ack_command = reader.read()?;
    let error_count = reader.read()?;
    let hi = reader.read()?;
    let lo = reader.read()?;
    let user_code_started_at = ((hi as u32 as u64) << 32) | (lo as u32 as u64);
    let speed = reader.read()?;
    let world_counter = reader.read()?;
    let cell_size = reader.read()?;
    let ask_id = reader.read()?;
    // Ask ids are always positive, so a zeroed region never reads as a
    // pending ask.
    let ask = if ask_id > 0 {
        let len = reader.read_len()?;
        Some(AskRequest {
            id: ask_id,
            prompt: reader.read_string(len)?,
        })
    } else {
        None
    };
    let delay_loop_active = reader.read()? != 0;
    let ready_for_invocations = reader.read()? != 0;

    Ok(DecodedFrame {
        exchange_seq,
        paint_seq,
        image,
        image_words,
        status: ConsumerStatus {
            last_ack_command,
            error_count,
            user_code_started_at,
            speed,
            world_counter,
            cell_size,
            ask,
            delay_loop_active,
            ready_for_invocations,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(payloads: Vec<CommandPayload>) -> DecodedCommands {
        let commands: Vec<Command> = payloads
            .into_iter()
            .enumerate()
            .map(|(i, payload)| Command::new(i as i32 + 1, payload))
            .collect();
        let mut area = vec![0i32; 4096];
        let issued = encode_commands(&mut area, &commands).expect("encode");
        assert_eq!(issued, commands.len());
        let decoded = decode_commands(&area).expect("decode");
        assert_eq!(decoded.commands, commands);
        decoded
    }

    #[test_timeout::timeout]
    fn encode_decode_key_events() {
        roundtrip(vec![
            CommandPayload::KeyDown { code: 32, text: " ".into() },
            CommandPayload::KeyUp { code: 32, text: " ".into() },
            CommandPayload::KeyTyped { code: 65, text: "å".into() },
        ]);
    }

    #[test_timeout::timeout]
    fn encode_decode_mouse_events() {
        let decoded = roundtrip(vec![
            CommandPayload::Mouse {
                action: MouseAction::Clicked,
                x: 17,
                y: 23,
                button: 1,
                click_count: 2,
            },
            CommandPayload::Mouse {
                action: MouseAction::Exited,
                x: -1,
                y: -1,
                button: 0,
                click_count: 0,
            },
        ]);
        assert_eq!(decoded.last_seq, Some(2));
    }

    #[test_timeout::timeout]
    fn encode_decode_control_commands() {
        roundtrip(vec![
            CommandPayload::Run,
            CommandPayload::Pause,
            CommandPayload::StepOnce,
            CommandPayload::InstantiateWorld { class_name: "CrabWorld".into() },
            CommandPayload::DiscardWorld,
            CommandPayload::ContinueDrag { drag_id: 4, x: 10, y: 20 },
            CommandPayload::EndDrag { drag_id: 4 },
            CommandPayload::SetSpeed { speed: 73 },
            CommandPayload::WorldFocusGained,
            CommandPayload::WorldFocusLost,
        ]);
    }

    #[test_timeout::timeout]
    fn encode_decode_ask_and_properties() {
        roundtrip(vec![
            CommandPayload::AskAnswered { answer: "forty-two".into() },
            CommandPayload::PropertyChanged {
                key: "world.size".into(),
                value: Some("640x480".into()),
            },
            CommandPayload::PropertyChanged {
                key: "world.theme".into(),
                value: None,
            },
        ]);
    }

    #[test_timeout::timeout]
    fn command_order_is_preserved() {
        let commands: Vec<Command> = (0..50)
            .map(|i| {
                Command::new(
                    100 + i,
                    if i % 2 == 0 {
                        CommandPayload::SetSpeed { speed: i }
                    } else {
                        CommandPayload::Mouse {
                            action: MouseAction::Moved,
                            x: i,
                            y: -i,
                            button: 0,
                            click_count: 0,
                        }
                    },
                )
            })
            .collect();
        let mut area = vec![0i32; 2048];
        encode_commands(&mut area, &commands).expect("encode");
        let decoded = decode_commands(&area).expect("decode");
        assert_eq!(decoded.commands, commands);
        assert_eq!(decoded.last_seq, Some(149));
    }

    #[test_timeout::timeout]
    fn partial_flush_keeps_records_whole() {
        let commands: Vec<Command> = (0..10)
            .map(|i| {
                Command::new(
                    i,
                    CommandPayload::InstantiateWorld {
                        class_name: "W".repeat(20),
                    },
                )
            })
            .collect();
        // Room for the count word plus two 23-word records and change.
        let mut area = vec![0i32; 50];
        let issued = encode_commands(&mut area, &commands).expect("encode");
        assert_eq!(issued, 2);
        let decoded = decode_commands(&area).expect("decode");
        assert_eq!(decoded.commands.len(), 2);
        assert_eq!(decoded.commands, commands[..2].to_vec());
    }

    #[test_timeout::timeout]
    fn oversized_single_command_is_rejected() {
        let command = Command::new(
            1,
            CommandPayload::AskAnswered {
                answer: "x".repeat(100),
            },
        );
        let mut area = vec![0i32; 32];
        let err = encode_commands(&mut area, std::slice::from_ref(&command)).unwrap_err();
        assert!(matches!(err, WireError::CommandTooLarge { .. }));
    }

    fn sample_status(ask: Option<AskRequest>) -> ConsumerStatus {
        ConsumerStatus {
            last_ack_command: 12,
            error_count: 3,
            user_code_started_at: 0x0001_0002_0003_0004,
            speed: 50,
            world_counter: 7,
            cell_size: 8,
            ask,
            delay_loop_active: true,
            ready_for_invocations: true,
        }
    }

    #[test_timeout::timeout]
    fn encode_decode_consumer_frame_with_image() {
        let pixels: Vec<i32> = (0..12).collect();
        let mut area = vec![0i32; 128];
        let words = encode_consumer_frame(
            &mut area,
            5,
            Some(ImageFrame { width: 4, height: 3, pixels: &pixels }),
            -1,
            0,
            &sample_status(None),
        )
        .expect("encode");
        assert_eq!(words, 12);

        let decoded = decode_consumer_frame(&area, 0).expect("decode");
        assert_eq!(decoded.exchange_seq, 5);
        assert_eq!(decoded.paint_seq, 5);
        let (width, height, range) = decoded.image.expect("image present");
        assert_eq!((width, height), (4, 3));
        assert_eq!(&area[range], pixels.as_slice());
        assert_eq!(decoded.status, sample_status(None));
    }

    #[test_timeout::timeout]
    fn telemetry_only_frame_skips_stale_pixels() {
        let pixels: Vec<i32> = vec![0x00FF_00FF; 6];
        let mut area = vec![0i32; 128];
        encode_consumer_frame(
            &mut area,
            9,
            Some(ImageFrame { width: 3, height: 2, pixels: &pixels }),
            -1,
            0,
            &sample_status(None),
        )
        .expect("first encode");

        let ask = Some(AskRequest { id: 4, prompt: "Pick a number".into() });
        encode_consumer_frame(&mut area, 10, None, 9, 6, &sample_status(ask.clone()))
            .expect("second encode");

        let decoded = decode_consumer_frame(&area, 6).expect("decode");
        assert_eq!(decoded.exchange_seq, 10);
        assert_eq!(decoded.paint_seq, 9);
        assert!(decoded.image.is_none());
        assert_eq!(decoded.image_words, 6);
        assert_eq!(decoded.status.ask, ask);
        // The stale pixel block is untouched.
        assert_eq!(&area[CONSUMER_PIXELS..CONSUMER_PIXELS + 6], pixels.as_slice());
    }

    #[test_timeout::timeout]
    fn overflow_leaves_previous_frame_intact() {
        let pixels: Vec<i32> = vec![7; 6];
        let mut area = vec![0i32; 64];
        encode_consumer_frame(
            &mut area,
            1,
            Some(ImageFrame { width: 3, height: 2, pixels: &pixels }),
            -1,
            0,
            &sample_status(None),
        )
        .expect("small frame fits");
        let before = area.clone();

        let huge: Vec<i32> = vec![0; 4096];
        let err = encode_consumer_frame(
            &mut area,
            2,
            Some(ImageFrame { width: 64, height: 64, pixels: &huge }),
            1,
            6,
            &sample_status(None),
        )
        .unwrap_err();
        assert!(matches!(err, WireError::ProtocolOverflow { .. }));
        assert!(err.to_string().contains("VIVARIUM_SHM_SIZE"));
        assert_eq!(area, before);
    }

    #[test_timeout::timeout]
    fn idle_time_roundtrips_through_word_pair() {
        let mut status = sample_status(None);
        status.user_code_started_at = u64::MAX - 1;
        let mut area = vec![0i32; 64];
        encode_consumer_frame(&mut area, 1, None, -1, 0, &status).expect("encode");
        let decoded = decode_consumer_frame(&area, 0).expect("decode");
        assert_eq!(decoded.status.user_code_started_at, u64::MAX - 1);
    }
}
