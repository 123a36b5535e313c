//! Cached last-known attributes of a session, replayed to late joiners.
//!
//! Values are stored as the encoded frames that were relayed, with the
//! session id already stamped in. Sealed bodies stay sealed.

use std::collections::HashMap;

use bytes::Bytes;
use shared::messages::{
    Facing, Hidden, Move, Name, RepeatingFlash, Speed, Sprite, System, Transparency,
};
use shared::PlayerPacket;

/// Open pictures kept per session.
pub const MAX_PICTURES: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PictureRecord {
    pub show: Bytes,
    /// Latest move since the show, replayed after it.
    pub last_move: Option<Bytes>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StickyState {
    pub name: Option<Bytes>,
    pub position: Option<Bytes>,
    pub facing: Option<Bytes>,
    pub speed: Option<Bytes>,
    pub sprite: Option<Bytes>,
    pub repeating_flash: Option<Bytes>,
    pub transparency: Option<Bytes>,
    pub hidden: Option<Bytes>,
    pub system: Option<Bytes>,
    /// Keyed by picture id hash.
    pub pictures: HashMap<u32, PictureRecord>,
}

impl StickyState {
    /// Clears everything but the name. Used on room change.
    pub fn reset_keep_name(&mut self) {
        let name = self.name.take();
        *self = StickyState {
            name,
            ..StickyState::default()
        };
    }

    /// Records a shown picture. Returns false when the set is full and the
    /// key is new.
    pub fn show_picture(&mut self, pic_id_hash: u32, show: Bytes) -> bool {
        if self.pictures.len() >= MAX_PICTURES && !self.pictures.contains_key(&pic_id_hash) {
            return false;
        }
        self.pictures.insert(
            pic_id_hash,
            PictureRecord {
                show,
                last_move: None,
            },
        );
        true
    }

    pub fn move_picture(&mut self, pic_id_hash: u32, movement: Bytes) {
        if let Some(record) = self.pictures.get_mut(&pic_id_hash) {
            record.last_move = Some(movement);
        }
    }

    pub fn erase_picture(&mut self, pic_id_hash: u32) {
        self.pictures.remove(&pic_id_hash);
    }

    /// Frames to send a late joiner, in replay order.
    pub fn replay(&self) -> Vec<Bytes> {
        let attributes = [
            &self.position,
            &self.facing,
            &self.speed,
            &self.name,
            &self.sprite,
            &self.repeating_flash,
            &self.transparency,
            &self.hidden,
            &self.system,
        ];
        let mut frames: Vec<Bytes> = attributes.into_iter().flatten().cloned().collect();

        let mut keys: Vec<_> = self.pictures.keys().copied().collect();
        keys.sort_unstable();
        for key in keys {
            if let Some(record) = self.pictures.get(&key) {
                frames.push(record.show.clone());
                frames.extend(record.last_move.clone());
            }
        }
        frames
    }
}

/// Packets that overwrite one sticky slot.
pub trait StickySlot: PlayerPacket {
    fn slot(state: &mut StickyState) -> &mut Option<Bytes>;
}

macro_rules! sticky_slots {
    ($($packet:ty => $field:ident),* $(,)?) => {
        $(
            impl StickySlot for $packet {
                fn slot(state: &mut StickyState) -> &mut Option<Bytes> {
                    &mut state.$field
                }
            }
        )*
    };
}

sticky_slots! {
    Name => name,
    Move => position,
    Facing => facing,
    Speed => speed,
    Sprite => sprite,
    RepeatingFlash => repeating_flash,
    Transparency => transparency,
    Hidden => hidden,
    System => system,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn b(s: &'static str) -> Bytes {
        Bytes::from_static(s.as_bytes())
    }

    #[test]
    fn test_reset_keeps_only_name() {
        let mut state = StickyState::default();
        *Name::slot(&mut state) = Some(b("name"));
        *Move::slot(&mut state) = Some(b("move"));
        *Hidden::slot(&mut state) = Some(b("hidden"));
        state.show_picture(1, b("pic"));

        state.reset_keep_name();
        assert_eq!(state.name, Some(b("name")));
        assert_eq!(state.position, None);
        assert_eq!(state.hidden, None);
        assert!(state.pictures.is_empty());
    }

    #[test]
    fn test_replay_order() {
        let mut state = StickyState::default();
        state.system = Some(b("system"));
        state.name = Some(b("name"));
        state.position = Some(b("move"));
        state.show_picture(7, b("show7"));
        state.move_picture(7, b("move7"));
        state.show_picture(3, b("show3"));

        assert_eq!(
            state.replay(),
            vec![b("move"), b("name"), b("system"), b("show3"), b("show7"), b("move7")]
        );
    }

    #[test]
    fn test_picture_cap() {
        let mut state = StickyState::default();
        for key in 0..MAX_PICTURES as u32 {
            assert!(state.show_picture(key, b("p")));
        }
        assert!(!state.show_picture(9999, b("p")));
        assert!(state.show_picture(0, b("again")));
        assert_eq!(state.pictures.len(), MAX_PICTURES);

        state.erase_picture(0);
        assert!(state.show_picture(9999, b("p")));
    }

    #[test]
    fn test_move_of_unknown_picture_is_ignored() {
        let mut state = StickyState::default();
        state.move_picture(5, b("m"));
        assert!(state.pictures.is_empty());
    }
}
