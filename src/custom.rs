//! Custom-function engine for the supported EOS bodies.
//!
//! Each custom function is addressed by a small index and carries one raw
//! byte; this module maps function and value names to the index/byte pairs
//! that go over the wire. Tables extracted from a 300D.

use crate::params::ParamError;
use crate::usb::CameraModel;

pub struct CustomValue {
    pub name: &'static str,
    raw: u8,
}

const fn value(name: &'static str, raw: u8) -> CustomValue {
    CustomValue { name, raw }
}

pub struct CustomDesc {
    pub name: &'static str,
    pub help: &'static str,
    index: u8,
    values: &'static [CustomValue],
}

impl CustomDesc {
    pub fn value_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.values.iter().map(|v| v.name)
    }
}

const SET_VALUES: &[CustomValue] = &[
    value("Default", 0x00),
    value("Quality", 0x01),
    value("Parameters", 0x02),
    value("Menu", 0x03),
    value("Replay", 0x04),
];

const CF_VALUES: &[CustomValue] = &[value("Yes", 0x00), value("No", 0x01)];

const SYNC_VALUES: &[CustomValue] = &[value("Auto", 0x00), value("1/200", 0x01)];

const AE_LOCK_VALUES: &[CustomValue] = &[
    value("AF/AE", 0x00),
    value("AE/AF", 0x01),
    value("AF/AF", 0x02),
    value("AE/AE", 0x03),
];

const BEAM_VALUES: &[CustomValue] = &[
    value("Emits/Fires", 0x00),
    value("Fires", 0x01),
    value("External", 0x02),
    value("Emits", 0x03),
];

const AE_INC_VALUES: &[CustomValue] = &[value("1/2", 0x00), value("1/3", 0x01)];

const AF_POINT_VALUES: &[CustomValue] = &[
    value("Center", 0x00),
    value("Bottom", 0x01),
    value("Right", 0x02),
    value("Xright", 0x03),
    value("Auto", 0x04),
    value("Xleft", 0x05),
    value("Left", 0x06),
    value("Top", 0x07),
];

const RAW_JPEG_VALUES: &[CustomValue] = &[
    value("S", 0x00),
    value("Sf", 0x01),
    value("M", 0x02),
    value("Mf", 0x03),
    value("L", 0x04),
    value("Lf", 0x05),
];

const BRACKET_VALUES: &[CustomValue] = &[
    value("0-+/E", 0x00),
    value("0-+/D", 0x01),
    value("-0+/E", 0x02),
    value("-0+/D", 0x03),
];

const SUPER_VALUES: &[CustomValue] = &[value("On", 0x00), value("Off", 0x01)];

const MENU_VALUES: &[CustomValue] = &[
    value("Previous/top", 0x00),
    value("Previous", 0x01),
    value("Top", 0x02),
];

const MLU_VALUES: &[CustomValue] = &[value("Off", 0x00), value("On", 0x01)];

const ASSIST_VALUES: &[CustomValue] = &[
    value("Normal", 0x00),
    value("Home", 0x01),
    value("HP", 0x02),
    value("Av", 0x03),
    value("FE", 0x04),
];

const CUSTOMS: &[CustomDesc] = &[
    CustomDesc {
        name: "SET",
        index: 1,
        values: SET_VALUES,
        help: "SET button func when shooting",
    },
    CustomDesc {
        name: "CF",
        index: 2,
        values: CF_VALUES,
        help: "Shutter release w/o CF card",
    },
    CustomDesc {
        name: "Sync",
        index: 3,
        values: SYNC_VALUES,
        help: "Flash sync speed in Av mode",
    },
    CustomDesc {
        name: "AElock",
        index: 4,
        values: AE_LOCK_VALUES,
        help: "Shutter button / AE lock button",
    },
    CustomDesc {
        name: "Beam",
        index: 5,
        values: BEAM_VALUES,
        help: "AF-assist beam / Flash firing",
    },
    CustomDesc {
        name: "AEinc",
        index: 6,
        values: AE_INC_VALUES,
        help: "Exposure level increments",
    },
    CustomDesc {
        name: "AF-point",
        index: 7,
        values: AF_POINT_VALUES,
        help: "AF point registration",
    },
    CustomDesc {
        name: "RAW+JPEG",
        index: 8,
        values: RAW_JPEG_VALUES,
        help: "RAW+JPEG recording",
    },
    CustomDesc {
        name: "Bracket",
        index: 9,
        values: BRACKET_VALUES,
        help: "Bracket Sequence / Auto cancel",
    },
    CustomDesc {
        name: "Super",
        index: 10,
        values: SUPER_VALUES,
        help: "Superimposed display",
    },
    CustomDesc {
        name: "Menu-pos",
        index: 11,
        values: MENU_VALUES,
        help: "Menu button display position",
    },
    CustomDesc {
        name: "MLU",
        index: 12,
        values: MLU_VALUES,
        help: "Mirror lockup",
    },
    CustomDesc {
        name: "Assist",
        index: 13,
        values: ASSIST_VALUES,
        help: "Assist button function",
    },
];

/// All known custom functions, for help output.
pub fn functions() -> &'static [CustomDesc] {
    CUSTOMS
}

fn model_supported(model: CameraModel) -> bool {
    model.is_eos() || model == CameraModel::Unknown
}

fn find(model: CameraModel, name: &str) -> Result<&'static CustomDesc, ParamError> {
    let desc = CUSTOMS
        .iter()
        .find(|c| c.name == name)
        .ok_or_else(|| ParamError::NoSuchName(name.to_owned()))?;
    if !model_supported(model) {
        return Err(ParamError::NotSupported(name.to_owned()));
    }
    Ok(desc)
}

/// Wire index of the named custom function.
pub fn function_index(model: CameraModel, name: &str) -> Result<u8, ParamError> {
    Ok(find(model, name)?.index)
}

/// Maps a raw byte read from the camera back to its value name.
pub fn decode(model: CameraModel, name: &str, raw: u8) -> Result<&'static str, ParamError> {
    let desc = find(model, name)?;
    desc.values
        .iter()
        .find(|v| v.raw == raw)
        .map(|v| v.name)
        .ok_or_else(|| ParamError::UnrecognizedValue {
            param: name.to_owned(),
        })
}

/// Maps a value name to the `(index, raw)` pair to send.
pub fn encode(model: CameraModel, name: &str, value: &str) -> Result<(u8, u8), ParamError> {
    let desc = find(model, name)?;
    let v = desc
        .values
        .iter()
        .find(|v| v.name == value)
        .ok_or_else(|| ParamError::NoSuchValue {
            param: name.to_owned(),
            value: value.to_owned(),
        })?;
    Ok((desc.index, v.raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn mirror_lockup_roundtrip() {
        assert_eq!(encode(CameraModel::Eos10D, "MLU", "On").unwrap(), (12, 0x01));
        assert_eq!(decode(CameraModel::Eos10D, "MLU", 0x01).unwrap(), "On");
        assert_eq!(function_index(CameraModel::Eos10D, "MLU").unwrap(), 12);
    }

    #[test]
    fn unknown_names_and_values() {
        assert_eq!(
            encode(CameraModel::Eos20D, "Nope", "On").unwrap_err(),
            ParamError::NoSuchName("Nope".into())
        );
        assert_eq!(
            encode(CameraModel::Eos20D, "MLU", "Maybe").unwrap_err(),
            ParamError::NoSuchValue {
                param: "MLU".into(),
                value: "Maybe".into()
            }
        );
        assert_eq!(
            decode(CameraModel::Eos20D, "Sync", 0x42).unwrap_err(),
            ParamError::UnrecognizedValue {
                param: "Sync".into()
            }
        );
    }

    #[test]
    fn only_eos_bodies_are_supported() {
        assert_eq!(
            function_index(CameraModel::S10, "MLU").unwrap_err(),
            ParamError::NotSupported("MLU".into())
        );
        assert!(function_index(CameraModel::Unknown, "MLU").is_ok());
    }
}
