use std::convert::Infallible;

/// Destination for mixed output samples. The engine calls `push_sample` exactly once per tick.
pub trait AudioOutput {
    type Err;

    /// Push a stereo sample to the audio device / output buffer.
    ///
    /// # Errors
    ///
    /// This method can return an error if it is unable to push the sample to the output.
    fn push_sample(&mut self, left: i16, right: i16) -> Result<(), Self::Err>;
}

impl AudioOutput for Vec<(i16, i16)> {
    type Err = Infallible;

    fn push_sample(&mut self, left: i16, right: i16) -> Result<(), Self::Err> {
        self.push((left, right));
        Ok(())
    }
}

/// Output sink that discards every sample.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullOutput;

impl AudioOutput for NullOutput {
    type Err = Infallible;

    fn push_sample(&mut self, _left: i16, _right: i16) -> Result<(), Self::Err> {
        Ok(())
    }
}
