//! Packet catalogue.
//!
//! Tags `0x01..=0x7F` are broadcast-shaped: the server relays them to peers
//! after overwriting the player `id`. Tags `0x80..=0xFF` only travel from a
//! client to the server.

use bytes::{BufMut, Bytes, BytesMut};

use crate::codec::{WireRead, WireWrite};
use crate::error::Result;
use crate::packet::Packet;

/// Highest tag of the broadcast range.
pub const MAX_BROADCAST_TAG: u8 = 0x7F;

pub fn is_broadcast_tag(tag: u8) -> bool {
    (0x01..=MAX_BROADCAST_TAG).contains(&tag)
}

pub fn is_client_tag(tag: u8) -> bool {
    tag > MAX_BROADCAST_TAG
}

/// Delivery scope of a routed packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum Visibility {
    #[default]
    Null = 0,
    Local = 1,
    Global = 2,
    Crypt = 4,
}

impl Visibility {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Visibility::Null),
            1 => Some(Visibility::Local),
            2 => Some(Visibility::Global),
            4 => Some(Visibility::Crypt),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Visibility::Null => "NULL",
            Visibility::Local => "LOCAL",
            Visibility::Global => "GLOBAL",
            Visibility::Crypt => "CRYPT",
        }
    }
}

/// A value with a fixed wire encoding.
pub trait Field: Sized {
    fn put(&self, buf: &mut BytesMut);
    fn get(buf: &mut Bytes) -> Result<Self>;
}

macro_rules! int_field {
    ($($ty:ty => $put:ident, $get:ident;)*) => {
        $(
            impl Field for $ty {
                fn put(&self, buf: &mut BytesMut) {
                    buf.$put(*self);
                }

                fn get(buf: &mut Bytes) -> Result<Self> {
                    buf.$get()
                }
            }
        )*
    };
}

int_field! {
    u8 => put_u8, read_u8;
    i8 => put_i8, read_i8;
    u16 => put_u16_le, read_u16;
    i16 => put_i16_le, read_i16;
    u32 => put_u32_le, read_u32;
    bool => put_bool, read_bool;
}

impl Field for String {
    fn put(&self, buf: &mut BytesMut) {
        buf.put_string16(self);
    }

    fn get(buf: &mut Bytes) -> Result<Self> {
        buf.read_string16()
    }
}

/// Declares a packet struct from its plaintext and body field lists.
macro_rules! packet {
    (
        $(#[$meta:meta])*
        $name:ident = $tag:expr;
        plain { $($pf:ident : $pt:ty),* $(,)? }
        body { $($bf:ident : $bt:ty),* $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Default, PartialEq, Eq)]
        pub struct $name {
            $(pub $pf: $pt,)*
            $(pub $bf: $bt,)*
        }

        impl Packet for $name {
            const TAG: u8 = $tag;

            #[allow(unused_variables)]
            fn write_plain(&self, buf: &mut BytesMut) {
                $(self.$pf.put(buf);)*
            }

            #[allow(unused_variables)]
            fn read_plain(&mut self, buf: &mut Bytes) -> Result<()> {
                $(self.$pf = <$pt as Field>::get(buf)?;)*
                Ok(())
            }

            #[allow(unused_variables)]
            fn write_body(&self, buf: &mut BytesMut) {
                $(self.$bf.put(buf);)*
            }

            #[allow(unused_variables)]
            fn read_body(&mut self, buf: &mut Bytes) -> Result<()> {
                $(self.$bf = <$bt as Field>::get(buf)?;)*
                Ok(())
            }
        }
    };
}

/// Packets whose first plaintext field is the sending player's id.
pub trait PlayerPacket: Packet {
    fn id(&self) -> u16;
    fn set_id(&mut self, id: u16);
}

macro_rules! player_packets {
    ($($name:ident),* $(,)?) => {
        $(
            impl PlayerPacket for $name {
                fn id(&self) -> u16 {
                    self.id
                }

                fn set_id(&mut self, id: u16) {
                    self.id = id;
                }
            }
        )*
    };
}

packet! {
    /// Liveness probe. The server echoes it to the sender only.
    Heartbeat = 0x01;
    plain {}
    body {}
}

packet! {
    /// Room change request, acknowledged back to the sender.
    ///
    /// Encrypted clients send `room_id = 0` and only the hash.
    Room = 0x02;
    plain { room_id: u16, room_hash: u32 }
    body {}
}

packet! {
    Join = 0x03;
    plain { id: u16 }
    body {}
}

packet! {
    Leave = 0x04;
    plain { id: u16 }
    body {}
}

packet! {
    Name = 0x05;
    plain { id: u16 }
    body { name: String }
}

packet! {
    /// Chat line. Routing fields stay in the clear, the text may be sealed.
    ///
    /// `kind` is 0 for server info lines and 1 for player chat. A CRYPT chat
    /// with a non-zero `crypt_key_hash` only registers the sender's private
    /// group and is not relayed.
    Chat = 0x06;
    plain { id: u16, kind: u8, visibility: u8, crypt_key_hash: u32 }
    body { room_id: u16, name: String, message: String, sys_name: String }
}

packet! {
    /// `kind` 0 is a normal step, 1 an event-driven relocation.
    Move = 0x07;
    plain { id: u16 }
    body { kind: i8, x: u16, y: u16 }
}

packet! {
    Jump = 0x09;
    plain { id: u16 }
    body { x: u16, y: u16 }
}

packet! {
    Facing = 0x0a;
    plain { id: u16 }
    body { facing: u8 }
}

packet! {
    Speed = 0x0b;
    plain { id: u16 }
    body { speed: u16 }
}

packet! {
    Sprite = 0x0c;
    plain { id: u16 }
    body { name: String, index: i16 }
}

packet! {
    /// One-shot screen flash.
    Flash = 0x0d;
    plain { id: u16 }
    body { r: u8, g: u8, b: u8, power: u8, frames: u8 }
}

packet! {
    RepeatingFlash = 0x0e;
    plain { id: u16 }
    body { r: u8, g: u8, b: u8, power: u8, frames: u8 }
}

packet! {
    RemoveRepeatingFlash = 0x0f;
    plain { id: u16 }
    body {}
}

packet! {
    Hidden = 0x10;
    plain { id: u16 }
    body { hidden: bool }
}

packet! {
    /// Window theme of the sender.
    System = 0x11;
    plain { id: u16 }
    body { name: String }
}

packet! {
    SoundEffect = 0x12;
    plain { id: u16 }
    body { name: String, volume: u16, tempo: u16, balance: u16 }
}

/// Where a picture is anchored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PicturePlacement {
    pub pic_id: u16,
    pub map_x: i16,
    pub map_y: i16,
    pub pan_x: i16,
    pub pan_y: i16,
}

impl Field for PicturePlacement {
    fn put(&self, buf: &mut BytesMut) {
        buf.put_u16_le(self.pic_id);
        buf.put_i16_le(self.map_x);
        buf.put_i16_le(self.map_y);
        buf.put_i16_le(self.pan_x);
        buf.put_i16_le(self.pan_y);
    }

    fn get(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            pic_id: buf.read_u16()?,
            map_x: buf.read_i16()?,
            map_y: buf.read_i16()?,
            pan_x: buf.read_i16()?,
            pan_y: buf.read_i16()?,
        })
    }
}

/// Display parameters shared by show and move.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PictureParams {
    pub position_x: i16,
    pub position_y: i16,
    pub magnify: i16,
    pub top_trans: i16,
    pub bottom_trans: i16,
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    pub saturation: u8,
    pub effect_mode: i16,
    pub effect_power: i16,
}

impl Field for PictureParams {
    fn put(&self, buf: &mut BytesMut) {
        for v in [
            self.position_x,
            self.position_y,
            self.magnify,
            self.top_trans,
            self.bottom_trans,
        ] {
            buf.put_i16_le(v);
        }
        buf.put_slice(&[self.red, self.green, self.blue, self.saturation]);
        buf.put_i16_le(self.effect_mode);
        buf.put_i16_le(self.effect_power);
    }

    fn get(buf: &mut Bytes) -> Result<Self> {
        Ok(Self {
            position_x: buf.read_i16()?,
            position_y: buf.read_i16()?,
            magnify: buf.read_i16()?,
            top_trans: buf.read_i16()?,
            bottom_trans: buf.read_i16()?,
            red: buf.read_u8()?,
            green: buf.read_u8()?,
            blue: buf.read_u8()?,
            saturation: buf.read_u8()?,
            effect_mode: buf.read_i16()?,
            effect_power: buf.read_i16()?,
        })
    }
}

packet! {
    /// `pic_id_hash` keys the picture on the server so encrypted and
    /// plaintext users of the same numeric id never collide.
    ShowPicture = 0x13;
    plain { id: u16, pic_id_hash: u32 }
    body {
        placement: PicturePlacement,
        params: PictureParams,
        name: String,
        use_transparent_color: bool,
        fixed_to_map: bool,
    }
}

packet! {
    MovePicture = 0x14;
    plain { id: u16, pic_id_hash: u32 }
    body { placement: PicturePlacement, params: PictureParams, duration: i16 }
}

packet! {
    ErasePicture = 0x15;
    plain { id: u16, pic_id_hash: u32 }
    body { pic_id: u16 }
}

packet! {
    ShowPlayerBattleAnim = 0x16;
    plain { id: u16 }
    body { anim_id: u16 }
}

packet! {
    Transparency = 0x17;
    plain { id: u16 }
    body { transparency: u8 }
}

packet! {
    /// First packet of a session: identifies the client population and room.
    ClientHello = 0x80;
    plain { namespace_hash: u32, room_id: u16 }
    body { name: String }
}

player_packets!(
    Join,
    Leave,
    Name,
    Chat,
    Move,
    Jump,
    Facing,
    Speed,
    Sprite,
    Flash,
    RepeatingFlash,
    RemoveRepeatingFlash,
    Hidden,
    System,
    SoundEffect,
    ShowPicture,
    MovePicture,
    ErasePicture,
    ShowPlayerBattleAnim,
    Transparency,
);
