//! PDF 操作 - 基础设施层
//!
//! 只暴露"合并 / 抽页 / 序列化"能力，不认识 Batch / Group

use lopdf::{dictionary, Dictionary, Document, Object, ObjectId};

/// 会被子节点继承的页面属性
const INHERITABLE_KEYS: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

/// 从内存加载 PDF
pub fn load_pdf(bytes: &[u8]) -> lopdf::Result<Document> {
    Document::load_mem(bytes)
}

/// 按物理页序返回页面对象 ID
pub fn page_ids(doc: &Document) -> Vec<ObjectId> {
    doc.get_pages().into_values().collect()
}

/// 序列化为字节
pub fn to_bytes(doc: &mut Document) -> lopdf::Result<Vec<u8>> {
    let mut buffer = Vec::new();
    doc.save_to(&mut buffer)?;
    Ok(buffer)
}

/// 按顺序合并多个文档
///
/// 结果是一棵扁平的页面树：第 n 个输入文档的页面紧跟在第 n-1 个之后，
/// 文档内部页序不变
pub fn merge_documents(documents: Vec<Document>) -> lopdf::Result<Document> {
    let mut merged = Document::with_version("1.5");
    let mut next_id = 1;
    let mut ordered_pages = Vec::new();

    for mut doc in documents {
        inline_inherited_attributes(&mut doc);
        doc.renumber_objects_with(next_id);
        next_id = doc.max_id + 1;

        ordered_pages.extend(page_ids(&doc));

        for (id, object) in doc.objects {
            let structural = matches!(
                object.type_name().unwrap_or(""),
                "Catalog" | "Pages" | "Outlines" | "Outline"
            );
            if !structural {
                merged.objects.insert(id, object);
            }
        }
    }

    merged.max_id = next_id - 1;
    install_page_tree(&mut merged, &ordered_pages)?;
    Ok(merged)
}

/// 按给定顺序抽取页面，生成新文档
///
/// 只复制从这些页面可达的对象，开销与抽取的页面大小成正比，与源文档大小无关。
/// `page_ids` 必须属于 `source` 且不重复
pub fn extract_pages(source: &Document, page_ids: &[ObjectId]) -> lopdf::Result<Document> {
    let mut doc = Document::with_version(source.version.clone());
    let mut pending = Vec::new();

    for &page_id in page_ids {
        let original = source.get_dictionary(page_id)?;
        let mut page = original.clone();
        for key in INHERITABLE_KEYS {
            if !page.has(key) {
                if let Some(value) = find_inherited(source, original, key) {
                    page.set(key.to_vec(), value);
                }
            }
        }
        page.remove(b"Parent");
        collect_references(&Object::Dictionary(page.clone()), &mut pending);
        doc.objects.insert(page_id, Object::Dictionary(page));
    }

    while let Some(id) = pending.pop() {
        if doc.objects.contains_key(&id) {
            continue;
        }
        // 悬空引用保持悬空
        let Ok(object) = source.get_object(id) else {
            continue;
        };
        // 注释等对象可能反向引用其他页面，不跟随到页面树
        if matches!(
            object.type_name().unwrap_or(""),
            "Page" | "Pages" | "Catalog"
        ) {
            continue;
        }
        collect_references(object, &mut pending);
        doc.objects.insert(id, object.clone());
    }

    doc.max_id = doc.objects.keys().map(|(id, _)| *id).max().unwrap_or(0);
    install_page_tree(&mut doc, page_ids)?;
    Ok(doc)
}

fn collect_references(object: &Object, out: &mut Vec<ObjectId>) {
    match object {
        Object::Reference(id) => out.push(*id),
        Object::Array(items) => items.iter().for_each(|item| collect_references(item, out)),
        Object::Dictionary(dict) => dict.iter().for_each(|(_, value)| collect_references(value, out)),
        Object::Stream(stream) => stream
            .dict
            .iter()
            .for_each(|(_, value)| collect_references(value, out)),
        _ => {}
    }
}

/// 用新的扁平页面树和目录替换原有结构
fn install_page_tree(doc: &mut Document, page_ids: &[ObjectId]) -> lopdf::Result<()> {
    let pages_id = doc.new_object_id();

    for page_id in page_ids {
        doc.get_dictionary_mut(*page_id)?
            .set("Parent", Object::Reference(pages_id));
    }

    let kids: Vec<Object> = page_ids.iter().map(|id| Object::Reference(*id)).collect();
    let pages = dictionary! {
        "Type" => "Pages",
        "Kids" => kids,
        "Count" => page_ids.len() as i64,
    };
    doc.objects.insert(pages_id, Object::Dictionary(pages));

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => Object::Reference(pages_id),
    });
    doc.trailer.set("Root", Object::Reference(catalog_id));
    Ok(())
}

/// 把从父节点继承的属性复制到每个页面上，重建页面树后渲染不变
fn inline_inherited_attributes(doc: &mut Document) {
    for page_id in page_ids(doc) {
        let inherited: Vec<(&[u8], Object)> = match doc.get_dictionary(page_id) {
            Ok(page) => INHERITABLE_KEYS
                .iter()
                .filter(|key| !page.has(**key))
                .filter_map(|key| find_inherited(doc, page, key).map(|value| (*key, value)))
                .collect(),
            Err(_) => continue,
        };

        if inherited.is_empty() {
            continue;
        }
        if let Ok(page) = doc.get_dictionary_mut(page_id) {
            for (key, value) in inherited {
                page.set(key.to_vec(), value);
            }
        }
    }
}

fn find_inherited(doc: &Document, page: &Dictionary, key: &[u8]) -> Option<Object> {
    let mut parent = page.get(b"Parent").and_then(Object::as_reference).ok();
    // 防止循环引用
    let mut depth = 0;
    while let Some(id) = parent {
        depth += 1;
        if depth > 64 {
            return None;
        }
        let node = doc.get_dictionary(id).ok()?;
        if let Ok(value) = node.get(key) {
            return Some(value.clone());
        }
        parent = node.get(b"Parent").and_then(Object::as_reference).ok();
    }
    None
}
