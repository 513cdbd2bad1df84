pub type CollectionName = String;

/// Documents travel through the crate as plain BSON documents.
pub type Document = bson::Document;

/// Identity values are whatever the model's identity field holds (`ObjectId` or string).
pub type DocumentId = bson::Bson;
