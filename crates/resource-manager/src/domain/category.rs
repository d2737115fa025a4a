use rm_proto::ComponentType;

/// Coarse resource class used for aggregate cycle accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    Audio,
    Video,
    Image,
    Camera,
    Lcd,
}

impl Category {
    pub(crate) fn slot(self) -> usize {
        match self {
            Category::Audio => 0,
            Category::Video => 1,
            Category::Image => 2,
            Category::Camera => 3,
            Category::Lcd => 4,
        }
    }

    /// Category of the component type sent on the wire, if it is accounted.
    pub fn from_type_index(index: u32) -> Option<Self> {
        ComponentType::from_index(index).and_then(category_of)
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Type to category table. IMA ADPCM codecs are not accounted.
const CATEGORY_TABLE: [(ComponentType, Category); 44] = {
    use Category::*;
    use ComponentType as T;
    [
        (T::Mp3Decoder, Audio),
        (T::AacDecoder, Audio),
        (T::AacEncoder, Audio),
        (T::ArmAacEncoder, Audio),
        (T::ArmAacDecoder, Audio),
        (T::PcmDecoder, Audio),
        (T::PcmEncoder, Audio),
        (T::NbAmrDecoder, Audio),
        (T::NbAmrEncoder, Audio),
        (T::WbAmrDecoder, Audio),
        (T::WbAmrEncoder, Audio),
        (T::WmaDecoder, Audio),
        (T::G711Decoder, Audio),
        (T::G711Encoder, Audio),
        (T::G722Decoder, Audio),
        (T::G722Encoder, Audio),
        (T::G723Decoder, Audio),
        (T::G723Encoder, Audio),
        (T::G726Decoder, Audio),
        (T::G726Encoder, Audio),
        (T::G729Decoder, Audio),
        (T::G729Encoder, Audio),
        (T::GsmFrDecoder, Audio),
        (T::GsmHrDecoder, Audio),
        (T::GsmFrEncoder, Audio),
        (T::GsmHrEncoder, Audio),
        (T::IlbcDecoder, Audio),
        (T::IlbcEncoder, Audio),
        (T::RaGeckoDecoder, Audio),
        (T::Mpeg4Decoder, Video),
        (T::Mpeg4Encoder, Video),
        (T::H263Decoder, Video),
        (T::H263Encoder, Video),
        (T::H264Decoder, Video),
        (T::H264Encoder, Video),
        (T::WmvDecoder, Video),
        (T::Mpeg2Decoder, Video),
        (T::Hd720pDecoder, Video),
        (T::Hd720pEncoder, Video),
        (T::JpegDecoder, Image),
        (T::JpegEncoder, Image),
        (T::Vpp, Image),
        (T::Camera, Camera),
        (T::Display, Lcd),
    ]
};

pub fn category_of(ty: ComponentType) -> Option<Category> {
    CATEGORY_TABLE
        .iter()
        .find(|(t, _)| *t == ty)
        .map(|(_, category)| *category)
}
