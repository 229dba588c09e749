use itertools::Itertools;

pub static TAR_FILE_EXT: &str = "tar";

pub trait FileExtProvider {
    fn file_ext(&self) -> Option<&'static str>;
}

/// Joins the tar extension with every layer's extension, e.g. `tar.gz`.
pub fn layered_file_ext<'a, I>(layers: I) -> String
where
    I: IntoIterator<Item = &'a dyn FileExtProvider>,
{
    std::iter::once(TAR_FILE_EXT)
        .chain(layers.into_iter().filter_map(|layer| layer.file_ext()))
        .join(".")
}
