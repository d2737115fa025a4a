use serde::Deserialize;
use serde::Serialize;

/// Codec component types, numbered as clients send them in `param1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum ComponentType {
    // audio
    Mp3Decoder = 0,
    AacDecoder,
    AacEncoder,
    ArmAacEncoder,
    ArmAacDecoder,
    PcmDecoder,
    PcmEncoder,
    NbAmrDecoder,
    NbAmrEncoder,
    WbAmrDecoder,
    WbAmrEncoder,
    WmaDecoder,
    G711Decoder,
    G711Encoder,
    G722Decoder,
    G722Encoder,
    G723Decoder,
    G723Encoder,
    G726Decoder,
    G726Encoder,
    G729Decoder,
    G729Encoder,
    GsmFrDecoder,
    GsmHrDecoder,
    GsmFrEncoder,
    GsmHrEncoder,
    IlbcDecoder,
    IlbcEncoder,
    ImaAdpcmDecoder,
    ImaAdpcmEncoder,
    RaGeckoDecoder,
    // video
    Mpeg4Decoder,
    Mpeg4Encoder,
    H263Decoder,
    H263Encoder,
    H264Decoder,
    H264Encoder,
    WmvDecoder,
    Mpeg2Decoder,
    Hd720pDecoder,
    Hd720pEncoder,
    // image
    JpegDecoder,
    JpegEncoder,
    Vpp,
    // camera
    Camera,
    Display,
}

impl ComponentType {
    pub const ALL: [ComponentType; 46] = [
        Self::Mp3Decoder,
        Self::AacDecoder,
        Self::AacEncoder,
        Self::ArmAacEncoder,
        Self::ArmAacDecoder,
        Self::PcmDecoder,
        Self::PcmEncoder,
        Self::NbAmrDecoder,
        Self::NbAmrEncoder,
        Self::WbAmrDecoder,
        Self::WbAmrEncoder,
        Self::WmaDecoder,
        Self::G711Decoder,
        Self::G711Encoder,
        Self::G722Decoder,
        Self::G722Encoder,
        Self::G723Decoder,
        Self::G723Encoder,
        Self::G726Decoder,
        Self::G726Encoder,
        Self::G729Decoder,
        Self::G729Encoder,
        Self::GsmFrDecoder,
        Self::GsmHrDecoder,
        Self::GsmFrEncoder,
        Self::GsmHrEncoder,
        Self::IlbcDecoder,
        Self::IlbcEncoder,
        Self::ImaAdpcmDecoder,
        Self::ImaAdpcmEncoder,
        Self::RaGeckoDecoder,
        Self::Mpeg4Decoder,
        Self::Mpeg4Encoder,
        Self::H263Decoder,
        Self::H263Encoder,
        Self::H264Decoder,
        Self::H264Encoder,
        Self::WmvDecoder,
        Self::Mpeg2Decoder,
        Self::Hd720pDecoder,
        Self::Hd720pEncoder,
        Self::JpegDecoder,
        Self::JpegEncoder,
        Self::Vpp,
        Self::Camera,
        Self::Display,
    ];

    /// Looks up the type sent on the wire as `index`.
    pub fn from_index(index: u32) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    pub fn index(self) -> u32 {
        self as u32
    }
}
