use std::collections::HashSet;
use thiserror::Error;

pub const GRID_WIDTH: u8 = 32;
pub const GRID_HEIGHT: u8 = 16;
pub const DEFAULT_PORT: u16 = 1337;

pub const FLAG_PLAYER_STATE: u8 = 0x01;
pub const FLAG_JOIN: u8 = 0x02;
pub const FLAG_JOIN_ACK: u8 = 0x03;
pub const FLAG_LEAVE: u8 = 0x04;
pub const FLAG_LEAVE_ACK: u8 = 0x05;
pub const FLAG_GAME_STATE: u8 = 0x06;

/// Steering state of a snake. `None` is the initial state; a snake
/// pointing `None` stays on its cell until the first state update arrives.
///
/// The discriminants are the wire encoding and must not be reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Direction {
    None = 0,
    Up = 1,
    Down = 2,
    Left = 3,
    Right = 4,
}

impl Direction {
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    pub fn from_byte(byte: u8) -> Result<Self, DecodeError> {
        match byte {
            0 => Ok(Direction::None),
            1 => Ok(Direction::Up),
            2 => Ok(Direction::Down),
            3 => Ok(Direction::Left),
            4 => Ok(Direction::Right),
            other => Err(DecodeError::InvalidDirection(other)),
        }
    }
}

/// One cell of the grid. Coordinates are always in `[0, width) x [0, height)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Point {
    pub x: u8,
    pub y: u8,
}

impl Point {
    /// The neighbouring cell one step in `direction`, wrapping both axes
    /// modulo the grid dimensions. `Direction::None` returns the cell itself.
    pub fn stepped(self, direction: Direction, width: u8, height: u8) -> Point {
        let (x, y) = (u16::from(self.x), u16::from(self.y));
        let (w, h) = (u16::from(width), u16::from(height));
        let (x, y) = match direction {
            Direction::None => (x, y),
            Direction::Up => (x, (y + h - 1) % h),
            Direction::Down => (x, (y + 1) % h),
            Direction::Left => ((x + w - 1) % w, y),
            Direction::Right => ((x + 1) % w, y),
        };
        Point {
            x: x as u8,
            y: y as u8,
        }
    }
}

/// Collects the cells covered by a set of snake bodies into one set,
/// the occupancy query used by spawn placement and tests.
pub fn occupied_cells<'a, I>(bodies: I) -> HashSet<Point>
where
    I: IntoIterator<Item = &'a [Point]>,
{
    bodies.into_iter().flatten().copied().collect()
}

/// Per-player slice of a game state broadcast: steering direction plus the
/// body segments, head first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerSnapshot {
    pub direction: Direction,
    pub segments: Vec<Point>,
}

/// Every datagram exchanged between client and server.
///
/// Wire format: one leading flag byte selects the kind, all multi-byte
/// integers are big-endian. Session ids are 32-bit in the model but occupy
/// eight bytes on the wire.
///
/// ```text
/// 0x01 PlayerState  | session id: 8 | direction: 1 | timestamp: 8 |
/// 0x02 Join         |
/// 0x03 JoinAck      | session id: 8 |
/// 0x04 Leave        | session id: 8 |
/// 0x05 LeaveAck     |
/// 0x06 GameState    | timestamp: 8 | grid w: 1 | grid h: 1 | players: 1 |
///                   per player: | direction: 1 | segments: 1 |
///                   then all (x: 1, y: 1) pairs in header order
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    PlayerState {
        session_id: u32,
        direction: Direction,
        timestamp: u64,
    },
    Join,
    JoinAck {
        session_id: u32,
    },
    Leave {
        session_id: u32,
    },
    LeaveAck,
    GameState {
        timestamp: u64,
        grid_width: u8,
        grid_height: u8,
        players: Vec<PlayerSnapshot>,
    },
}

/// Reasons a datagram fails to decode. A failed decode drops the datagram;
/// it never panics and never reads past the buffer end.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("empty datagram")]
    Empty,
    #[error("datagram truncated, {missing} byte(s) missing")]
    Truncated { missing: usize },
    #[error("unknown packet flag {0:#04x}")]
    UnknownFlag(u8),
    #[error("invalid direction byte {0}")]
    InvalidDirection(u8),
    #[error("session id {0} exceeds the 32-bit id space")]
    SessionIdRange(u64),
    #[error("player {0} has a zero-length body")]
    EmptyBody(u8),
    #[error("{0} trailing byte(s) after packet end")]
    TrailingBytes(usize),
}

/// Bounds-checked cursor over an inbound datagram.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        let remaining = self.buf.len() - self.pos;
        if remaining < len {
            return Err(DecodeError::Truncated {
                missing: len - remaining,
            });
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn read_u64(&mut self) -> Result<u64, DecodeError> {
        let bytes = self.take(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(bytes);
        Ok(u64::from_be_bytes(raw))
    }

    fn read_session_id(&mut self) -> Result<u32, DecodeError> {
        let wide = self.read_u64()?;
        u32::try_from(wide).map_err(|_| DecodeError::SessionIdRange(wide))
    }

    fn finish(self) -> Result<(), DecodeError> {
        if self.pos == self.buf.len() {
            Ok(())
        } else {
            Err(DecodeError::TrailingBytes(self.buf.len() - self.pos))
        }
    }
}

impl Packet {
    /// Serializes the packet into its wire representation.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        match self {
            Packet::PlayerState {
                session_id,
                direction,
                timestamp,
            } => {
                buf.push(FLAG_PLAYER_STATE);
                buf.extend_from_slice(&u64::from(*session_id).to_be_bytes());
                buf.push(direction.to_byte());
                buf.extend_from_slice(&timestamp.to_be_bytes());
            }
            Packet::Join => buf.push(FLAG_JOIN),
            Packet::JoinAck { session_id } => {
                buf.push(FLAG_JOIN_ACK);
                buf.extend_from_slice(&u64::from(*session_id).to_be_bytes());
            }
            Packet::Leave { session_id } => {
                buf.push(FLAG_LEAVE);
                buf.extend_from_slice(&u64::from(*session_id).to_be_bytes());
            }
            Packet::LeaveAck => buf.push(FLAG_LEAVE_ACK),
            Packet::GameState {
                timestamp,
                grid_width,
                grid_height,
                players,
            } => {
                debug_assert!(players.len() <= usize::from(u8::MAX));
                buf.push(FLAG_GAME_STATE);
                buf.extend_from_slice(&timestamp.to_be_bytes());
                buf.push(*grid_width);
                buf.push(*grid_height);
                buf.push(players.len() as u8);
                for player in players {
                    debug_assert!(!player.segments.is_empty());
                    debug_assert!(player.segments.len() <= usize::from(u8::MAX));
                    buf.push(player.direction.to_byte());
                    buf.push(player.segments.len() as u8);
                }
                for player in players {
                    for segment in &player.segments {
                        buf.push(segment.x);
                        buf.push(segment.y);
                    }
                }
            }
        }
        buf
    }

    /// Parses one datagram. Validates length before every field read;
    /// any leftover bytes after the packet end are rejected as well.
    pub fn decode(data: &[u8]) -> Result<Packet, DecodeError> {
        if data.is_empty() {
            return Err(DecodeError::Empty);
        }
        let mut reader = Reader::new(data);
        let flag = reader.read_u8()?;
        let packet = match flag {
            FLAG_PLAYER_STATE => {
                let session_id = reader.read_session_id()?;
                let direction = Direction::from_byte(reader.read_u8()?)?;
                let timestamp = reader.read_u64()?;
                Packet::PlayerState {
                    session_id,
                    direction,
                    timestamp,
                }
            }
            FLAG_JOIN => Packet::Join,
            FLAG_JOIN_ACK => Packet::JoinAck {
                session_id: reader.read_session_id()?,
            },
            FLAG_LEAVE => Packet::Leave {
                session_id: reader.read_session_id()?,
            },
            FLAG_LEAVE_ACK => Packet::LeaveAck,
            FLAG_GAME_STATE => {
                let timestamp = reader.read_u64()?;
                let grid_width = reader.read_u8()?;
                let grid_height = reader.read_u8()?;
                let num_players = reader.read_u8()?;

                let mut headers = Vec::with_capacity(usize::from(num_players));
                for index in 0..num_players {
                    let direction = Direction::from_byte(reader.read_u8()?)?;
                    let num_segments = reader.read_u8()?;
                    if num_segments == 0 {
                        return Err(DecodeError::EmptyBody(index));
                    }
                    headers.push((direction, num_segments));
                }

                let mut players = Vec::with_capacity(usize::from(num_players));
                for (direction, num_segments) in headers {
                    let mut segments = Vec::with_capacity(usize::from(num_segments));
                    for _ in 0..num_segments {
                        let x = reader.read_u8()?;
                        let y = reader.read_u8()?;
                        segments.push(Point { x, y });
                    }
                    players.push(PlayerSnapshot {
                        direction,
                        segments,
                    });
                }

                Packet::GameState {
                    timestamp,
                    grid_width,
                    grid_height,
                    players,
                }
            }
            other => return Err(DecodeError::UnknownFlag(other)),
        };
        reader.finish()?;
        Ok(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(packet: Packet) {
        let encoded = packet.encode();
        let decoded = Packet::decode(&encoded).unwrap();
        assert_eq!(packet, decoded);
    }

    #[test]
    fn test_direction_byte_roundtrip() {
        for byte in 0..=4u8 {
            let direction = Direction::from_byte(byte).unwrap();
            assert_eq!(direction.to_byte(), byte);
        }
    }

    #[test]
    fn test_direction_invalid_byte() {
        assert_eq!(
            Direction::from_byte(5),
            Err(DecodeError::InvalidDirection(5))
        );
        assert_eq!(
            Direction::from_byte(255),
            Err(DecodeError::InvalidDirection(255))
        );
    }

    #[test]
    fn test_stepped_interior() {
        let p = Point { x: 10, y: 8 };
        assert_eq!(
            p.stepped(Direction::Up, GRID_WIDTH, GRID_HEIGHT),
            Point { x: 10, y: 7 }
        );
        assert_eq!(
            p.stepped(Direction::Down, GRID_WIDTH, GRID_HEIGHT),
            Point { x: 10, y: 9 }
        );
        assert_eq!(
            p.stepped(Direction::Left, GRID_WIDTH, GRID_HEIGHT),
            Point { x: 9, y: 8 }
        );
        assert_eq!(
            p.stepped(Direction::Right, GRID_WIDTH, GRID_HEIGHT),
            Point { x: 11, y: 8 }
        );
    }

    #[test]
    fn test_stepped_wraps_at_edges() {
        let right_edge = Point { x: 31, y: 5 };
        assert_eq!(
            right_edge.stepped(Direction::Right, GRID_WIDTH, GRID_HEIGHT),
            Point { x: 0, y: 5 }
        );

        let left_edge = Point { x: 0, y: 5 };
        assert_eq!(
            left_edge.stepped(Direction::Left, GRID_WIDTH, GRID_HEIGHT),
            Point { x: 31, y: 5 }
        );

        let top_edge = Point { x: 7, y: 0 };
        assert_eq!(
            top_edge.stepped(Direction::Up, GRID_WIDTH, GRID_HEIGHT),
            Point { x: 7, y: 15 }
        );

        let bottom_edge = Point { x: 7, y: 15 };
        assert_eq!(
            bottom_edge.stepped(Direction::Down, GRID_WIDTH, GRID_HEIGHT),
            Point { x: 7, y: 0 }
        );
    }

    #[test]
    fn test_stepped_none_stays_put() {
        let p = Point { x: 3, y: 3 };
        assert_eq!(p.stepped(Direction::None, GRID_WIDTH, GRID_HEIGHT), p);
    }

    #[test]
    fn test_occupied_cells_union() {
        let body_a = [Point { x: 1, y: 1 }, Point { x: 1, y: 2 }];
        let body_b = [Point { x: 1, y: 2 }, Point { x: 5, y: 5 }];
        let occupied = occupied_cells([&body_a[..], &body_b[..]]);

        assert_eq!(occupied.len(), 3);
        assert!(occupied.contains(&Point { x: 1, y: 1 }));
        assert!(occupied.contains(&Point { x: 1, y: 2 }));
        assert!(occupied.contains(&Point { x: 5, y: 5 }));
        assert!(!occupied.contains(&Point { x: 0, y: 0 }));
    }

    #[test]
    fn test_join_wire_layout() {
        assert_eq!(Packet::Join.encode(), vec![0x02]);
    }

    #[test]
    fn test_join_ack_wire_layout() {
        let encoded = Packet::JoinAck { session_id: 42 }.encode();
        assert_eq!(encoded, vec![0x03, 0, 0, 0, 0, 0, 0, 0, 42]);
    }

    #[test]
    fn test_player_state_wire_layout() {
        let encoded = Packet::PlayerState {
            session_id: 0x0102_0304,
            direction: Direction::Right,
            timestamp: 0x0A0B_0C0D_0E0F_1011,
        }
        .encode();

        assert_eq!(encoded.len(), 18);
        assert_eq!(encoded[0], FLAG_PLAYER_STATE);
        // Big-endian session id, zero-extended to eight bytes
        assert_eq!(&encoded[1..9], &[0, 0, 0, 0, 0x01, 0x02, 0x03, 0x04]);
        assert_eq!(encoded[9], 4);
        assert_eq!(
            &encoded[10..18],
            &[0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F, 0x10, 0x11]
        );
    }

    #[test]
    fn test_game_state_wire_layout() {
        let encoded = Packet::GameState {
            timestamp: 1,
            grid_width: 32,
            grid_height: 16,
            players: vec![
                PlayerSnapshot {
                    direction: Direction::Up,
                    segments: vec![Point { x: 1, y: 2 }, Point { x: 1, y: 3 }],
                },
                PlayerSnapshot {
                    direction: Direction::Left,
                    segments: vec![Point { x: 9, y: 9 }],
                },
            ],
        }
        .encode();

        // flag + timestamp + dims + count, two headers, three segments
        assert_eq!(encoded.len(), 1 + 8 + 3 + 2 * 2 + 3 * 2);
        assert_eq!(encoded[0], FLAG_GAME_STATE);
        assert_eq!(encoded[9..12], [32, 16, 2]);
        assert_eq!(encoded[12..16], [1, 2, 3, 1]); // headers: (Up, 2), (Left, 1)
        assert_eq!(encoded[16..22], [1, 2, 1, 3, 9, 9]); // interleaved x, y pairs
    }

    #[test]
    fn test_roundtrip_all_kinds() {
        roundtrip(Packet::Join);
        roundtrip(Packet::JoinAck { session_id: 1 });
        roundtrip(Packet::JoinAck {
            session_id: u32::MAX,
        });
        roundtrip(Packet::Leave { session_id: 7 });
        roundtrip(Packet::LeaveAck);
        roundtrip(Packet::PlayerState {
            session_id: 3,
            direction: Direction::Down,
            timestamp: 1_700_000_000_000,
        });
        roundtrip(Packet::GameState {
            timestamp: 1_700_000_000_000,
            grid_width: GRID_WIDTH,
            grid_height: GRID_HEIGHT,
            players: vec![PlayerSnapshot {
                direction: Direction::None,
                segments: vec![Point { x: 31, y: 15 }],
            }],
        });
    }

    #[test]
    fn test_roundtrip_zero_players() {
        roundtrip(Packet::GameState {
            timestamp: 0,
            grid_width: GRID_WIDTH,
            grid_height: GRID_HEIGHT,
            players: Vec::new(),
        });
    }

    #[test]
    fn test_roundtrip_max_players() {
        let players = (0u8..255)
            .map(|i| PlayerSnapshot {
                direction: Direction::Right,
                segments: vec![Point {
                    x: i % GRID_WIDTH,
                    y: i % GRID_HEIGHT,
                }],
            })
            .collect();

        roundtrip(Packet::GameState {
            timestamp: 99,
            grid_width: GRID_WIDTH,
            grid_height: GRID_HEIGHT,
            players,
        });
    }

    #[test]
    fn test_decode_empty_datagram() {
        assert_eq!(Packet::decode(&[]), Err(DecodeError::Empty));
    }

    #[test]
    fn test_decode_unknown_flag() {
        assert_eq!(Packet::decode(&[0x7F]), Err(DecodeError::UnknownFlag(0x7F)));
        assert_eq!(Packet::decode(&[0x00]), Err(DecodeError::UnknownFlag(0x00)));
    }

    #[test]
    fn test_decode_truncated_at_every_length() {
        let full = Packet::PlayerState {
            session_id: 12,
            direction: Direction::Up,
            timestamp: 34,
        }
        .encode();

        for len in 1..full.len() {
            let err = Packet::decode(&full[..len]).unwrap_err();
            assert!(
                matches!(err, DecodeError::Truncated { .. }),
                "length {} gave {:?}",
                len,
                err
            );
        }
    }

    #[test]
    fn test_decode_truncated_segment_list() {
        let mut encoded = Packet::GameState {
            timestamp: 5,
            grid_width: GRID_WIDTH,
            grid_height: GRID_HEIGHT,
            players: vec![PlayerSnapshot {
                direction: Direction::Down,
                segments: vec![Point { x: 1, y: 1 }, Point { x: 1, y: 2 }],
            }],
        }
        .encode();

        // Drop the final y byte of the segment list
        encoded.pop();
        assert_eq!(
            Packet::decode(&encoded),
            Err(DecodeError::Truncated { missing: 1 })
        );
    }

    #[test]
    fn test_decode_rejects_zero_length_body() {
        let mut encoded = Packet::GameState {
            timestamp: 5,
            grid_width: GRID_WIDTH,
            grid_height: GRID_HEIGHT,
            players: vec![PlayerSnapshot {
                direction: Direction::Down,
                segments: vec![Point { x: 1, y: 1 }],
            }],
        }
        .encode();

        // Header of player 0: direction at offset 12, segment count at 13
        encoded[13] = 0;
        encoded.truncate(14);
        assert_eq!(Packet::decode(&encoded), Err(DecodeError::EmptyBody(0)));
    }

    #[test]
    fn test_decode_rejects_invalid_direction() {
        let mut encoded = Packet::PlayerState {
            session_id: 1,
            direction: Direction::Left,
            timestamp: 2,
        }
        .encode();

        encoded[9] = 9;
        assert_eq!(
            Packet::decode(&encoded),
            Err(DecodeError::InvalidDirection(9))
        );
    }

    #[test]
    fn test_decode_rejects_wide_session_id() {
        let mut encoded = Packet::Leave { session_id: 1 }.encode();
        encoded[1] = 0x01; // most significant byte of the 8-byte id
        assert_eq!(
            Packet::decode(&encoded),
            Err(DecodeError::SessionIdRange(0x0100_0000_0000_0001))
        );
    }

    #[test]
    fn test_decode_rejects_trailing_bytes() {
        let mut encoded = Packet::Join.encode();
        encoded.push(0xFF);
        assert_eq!(Packet::decode(&encoded), Err(DecodeError::TrailingBytes(1)));
    }
}
