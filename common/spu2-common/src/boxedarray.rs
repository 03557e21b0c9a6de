//! A wrapper around `Box<[i16; LEN]>` that is allocated fallibly and that has a custom
//! `bincode::Decode` implementation which deserializes directly into heap memory.
//!
//! `#[derive(Decode)]` on `Box<[i16; LEN]>` builds the array on the stack before moving it to the
//! heap, which overflows the stack for arrays the size of sound RAM.

use bincode::de::{BorrowDecoder, Decoder};
use bincode::error::DecodeError;
use bincode::{BorrowDecode, Decode, Encode};
use std::collections::TryReserveError;
use std::ops::{Deref, DerefMut};

#[derive(Debug, Clone, Encode)]
pub struct BoxedSampleArray<const LEN: usize>(Box<[i16; LEN]>);

impl<const LEN: usize> BoxedSampleArray<LEN> {
    /// Allocate a zero-filled array on the heap.
    ///
    /// # Errors
    ///
    /// Returns an error if the allocator cannot provide `LEN` samples.
    pub fn try_new() -> Result<Self, TryReserveError> {
        try_allocate().map(Self)
    }

    /// Size of the array in bytes.
    #[must_use]
    pub const fn size_bytes() -> usize {
        LEN * size_of::<i16>()
    }
}

fn try_allocate<const LEN: usize>() -> Result<Box<[i16; LEN]>, TryReserveError> {
    let mut samples: Vec<i16> = Vec::new();
    samples.try_reserve_exact(LEN)?;
    samples.resize(LEN, 0);

    match samples.into_boxed_slice().try_into() {
        Ok(array) => Ok(array),
        Err(_) => unreachable!("vec was resized to exactly LEN samples"),
    }
}

impl<const LEN: usize> Deref for BoxedSampleArray<LEN> {
    type Target = Box<[i16; LEN]>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<const LEN: usize> DerefMut for BoxedSampleArray<LEN> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

fn decode_into_heap<const LEN: usize, Context, D: Decoder<Context = Context>>(
    decoder: &mut D,
) -> Result<Box<[i16; LEN]>, DecodeError> {
    let mut array =
        try_allocate::<LEN>().map_err(|_| DecodeError::Other("unable to allocate sample array"))?;

    for sample in array.iter_mut() {
        *sample = i16::decode(decoder)?;
    }

    Ok(array)
}

impl<const LEN: usize, Context> Decode<Context> for BoxedSampleArray<LEN> {
    fn decode<D: Decoder<Context = Context>>(decoder: &mut D) -> Result<Self, DecodeError> {
        decode_into_heap::<LEN, Context, D>(decoder).map(Self)
    }
}

impl<'de, const LEN: usize, Context> BorrowDecode<'de, Context> for BoxedSampleArray<LEN> {
    fn borrow_decode<D: BorrowDecoder<'de, Context = Context>>(
        decoder: &mut D,
    ) -> Result<Self, DecodeError> {
        decode_into_heap::<LEN, Context, D>(decoder).map(Self)
    }
}
