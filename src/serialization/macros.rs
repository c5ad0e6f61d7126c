/// Implement [`Record`](crate::serialization::Record) for a struct by listing
/// its participating fields in wire order.
///
/// Fields left out of the list are not serialized and are filled from the
/// struct's `Default` impl on decode, so the struct must implement `Default`.
///
/// ```
/// # use stubcodec::impl_record;
/// #[derive(Default)]
/// struct Limits {
///     max_conns: u32,
///     ratio:     f64,
///     scratch:   Vec<u8>,
/// }
/// impl_record!(Limits { max_conns, ratio });
/// ```
#[macro_export]
macro_rules! impl_record {
    (@unit $field:ident) => {
        ()
    };
    ($ty:ty { $($field:ident),* $(,)? }) => {
        impl $crate::serialization::Record for $ty {
            const FIELD_COUNT: usize = <[()]>::len(&[$($crate::impl_record!(@unit $field)),*]);

            fn encode_fields(
                &self,
                encoder: &mut $crate::serialization::FieldEncoder,
            ) -> ::std::result::Result<(), $crate::serialization::SerializeError> {
                $(encoder.field(::std::stringify!($field), &self.$field)?;)*
                ::std::result::Result::Ok(())
            }

            #[allow(clippy::needless_update)]
            fn decode_fields(
                decoder: &mut $crate::serialization::FieldDecoder<'_>,
            ) -> ::std::result::Result<Self, $crate::serialization::SerializeError> {
                ::std::result::Result::Ok(Self {
                    $($field: decoder.field(::std::stringify!($field))?,)*
                    ..::std::default::Default::default()
                })
            }
        }
    };
}
