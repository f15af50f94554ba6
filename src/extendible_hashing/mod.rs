pub mod extendible_hashing;
pub mod hash_bucket_page;
pub mod hash_directory_page;
pub mod hash_header_page;

/// Codec shared by every page layout: fixed-width integers, no length prefix
/// on fixed arrays. Deterministic sizes keep each layout within one page.
pub(crate) fn page_codec() -> impl bincode::config::Config {
    bincode::config::standard()
        .with_fixed_int_encoding()
        .skip_fixed_array_length()
}
